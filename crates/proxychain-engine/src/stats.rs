//! Per-chain connection counters.

use std::sync::atomic::{AtomicU64, Ordering};

use proxychain_core::io::TrafficCounter;

/// Counters for one chain entry, shared with its listener tasks.
#[derive(Debug, Default)]
pub struct ChainCounters {
    accepted: AtomicU64,
    active: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
}

/// Point-in-time copy of [`ChainCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub accepted: u64,
    pub active: u64,
    /// Closed at accept time because the connection ceiling was reached.
    pub rejected: u64,
    /// Auth, handshake, tunnel or relay failures.
    pub failed: u64,
    pub bytes_up: u64,
    pub bytes_down: u64,
}

impl ChainCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            bytes_up: self.bytes_up.load(Ordering::Relaxed),
            bytes_down: self.bytes_down.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_closed(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

impl TrafficCounter for ChainCounters {
    fn record_upstream(&self, bytes: u64) {
        self.bytes_up.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_downstream(&self, bytes: u64) {
        self.bytes_down.fetch_add(bytes, Ordering::Relaxed);
    }
}
