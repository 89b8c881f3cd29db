//! Chain registry: a generational arena of chain entries.
//!
//! Handles pack `generation << 32 | index`. A slot's generation is bumped
//! when its entry is removed, so a stale handle never resolves to the entry
//! that later reuses the slot.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use proxychain_config::{ChainConfig, ParseError};
use tracing::info;

use crate::listener::ListenerSlot;
use crate::stats::{ChainCounters, CounterSnapshot};

/// Generations stay below 2^31 so a packed handle is always a positive `i64`.
const MAX_GENERATION: u32 = i32::MAX as u32;

/// Opaque identifier of one chain entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainHandle(u64);

impl ChainHandle {
    fn new(index: u32, generation: u32) -> Self {
        Self((u64::from(generation) << 32) | u64::from(index))
    }

    /// Rebuild a handle from its boundary form. Zero and negative values are
    /// never valid; a positive value that was never issued decodes but
    /// resolves to no entry.
    pub fn from_raw(raw: i64) -> Option<Self> {
        u64::try_from(raw).ok().filter(|v| *v != 0).map(Self)
    }

    pub fn as_raw(self) -> i64 {
        self.0 as i64
    }

    fn index(self) -> usize {
        (self.0 & 0xFFFF_FFFF) as usize
    }

    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for ChainHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index(), self.generation())
    }
}

impl fmt::Debug for ChainHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainHandle({self})")
    }
}

/// Config and counters shared between an entry and its listener tasks.
#[derive(Clone)]
pub(crate) struct SharedChain {
    pub config: Arc<ArcSwap<ChainConfig>>,
    pub counters: Arc<ChainCounters>,
}

/// Live state behind one handle.
pub struct ChainEntry {
    handle: ChainHandle,
    shared: SharedChain,
    /// Serializes updates so they install in the order received.
    update_lock: Mutex<()>,
    pub(crate) listener: ListenerSlot,
}

impl ChainEntry {
    fn new(handle: ChainHandle) -> Self {
        Self {
            handle,
            shared: SharedChain {
                config: Arc::new(ArcSwap::from_pointee(ChainConfig::direct())),
                counters: Arc::new(ChainCounters::default()),
            },
            update_lock: Mutex::new(()),
            listener: ListenerSlot::new(),
        }
    }

    pub fn handle(&self) -> ChainHandle {
        self.handle
    }

    /// The config in force right now. Later updates do not affect it.
    pub fn snapshot(&self) -> Arc<ChainConfig> {
        self.shared.config.load_full()
    }

    /// Parse `blob` and install it. On error the current config stays.
    pub fn update(&self, blob: &str) -> Result<(), ParseError> {
        let _order = self.update_lock.lock();
        let config = ChainConfig::parse(blob)?;
        self.store(config);
        Ok(())
    }

    /// Install an already validated config.
    pub fn install(&self, config: ChainConfig) {
        let _order = self.update_lock.lock();
        self.store(config);
    }

    fn store(&self, config: ChainConfig) {
        let hops = config.hops.len();
        self.shared.config.store(Arc::new(config));
        info!(handle = %self.handle, hops, "chain config installed");
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.shared.counters.snapshot()
    }

    pub(crate) fn shared(&self) -> SharedChain {
        self.shared.clone()
    }
}

impl fmt::Debug for ChainEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainEntry")
            .field("handle", &self.handle)
            .field("hops", &self.snapshot().hops.len())
            .field("listener", &self.listener.state())
            .finish()
    }
}

struct Slot {
    generation: u32,
    entry: Option<Arc<ChainEntry>>,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

/// Registry of chain entries keyed by [`ChainHandle`].
#[derive(Default)]
pub struct ChainStore {
    arena: RwLock<Arena>,
}

impl ChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an entry holding the direct-connect config.
    pub fn create(&self) -> Arc<ChainEntry> {
        let mut arena = self.arena.write();
        let index = match arena.free.pop() {
            Some(index) => index,
            None => {
                arena.slots.push(Slot {
                    generation: 1,
                    entry: None,
                });
                (arena.slots.len() - 1) as u32
            }
        };
        let slot = &mut arena.slots[index as usize];
        let entry = Arc::new(ChainEntry::new(ChainHandle::new(index, slot.generation)));
        slot.entry = Some(entry.clone());
        entry
    }

    pub fn get(&self, handle: ChainHandle) -> Option<Arc<ChainEntry>> {
        let arena = self.arena.read();
        let slot = arena.slots.get(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.entry.clone()
    }

    /// Detach the entry from the registry. Returns `None` if the handle is
    /// unknown or already removed.
    pub fn remove(&self, handle: ChainHandle) -> Option<Arc<ChainEntry>> {
        let mut arena = self.arena.write();
        let slot = arena.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = if slot.generation >= MAX_GENERATION {
            1
        } else {
            slot.generation + 1
        };
        arena.free.push(handle.index() as u32);
        Some(entry)
    }

    pub fn handles(&self) -> Vec<ChainHandle> {
        self.arena
            .read()
            .slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref().map(|e| e.handle()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.arena
            .read()
            .slots
            .iter()
            .filter(|slot| slot.entry.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
