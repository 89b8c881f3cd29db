//! Async engine API over the chain registry.

use std::net::SocketAddr;
use std::sync::Arc;

use proxychain_config::ChainConfig;
use proxychain_tunnel::TunnelBuilder;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::listener::{ListenerOptions, ListenerState};
use crate::stats::CounterSnapshot;
use crate::store::{ChainEntry, ChainHandle, ChainStore};

/// Owns every chain entry and the tunnel builder they share.
#[derive(Default)]
pub struct ProxyEngine {
    store: ChainStore,
    pub(crate) builder: TunnelBuilder,
}

impl ProxyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom builder (TLS roots, socket options).
    pub fn with_builder(builder: TunnelBuilder) -> Self {
        Self {
            store: ChainStore::new(),
            builder,
        }
    }

    /// Create an entry holding the direct-connect config.
    pub fn create_chain(&self) -> ChainHandle {
        let handle = self.store.create().handle();
        info!(handle = %handle, "chain created");
        handle
    }

    pub(crate) fn entry(&self, handle: ChainHandle) -> Result<Arc<ChainEntry>, EngineError> {
        self.store
            .get(handle)
            .ok_or(EngineError::UnknownHandle(handle))
    }

    /// Parse `blob` and install it; the previous config stays on error.
    pub fn update_chain(&self, handle: ChainHandle, blob: &str) -> Result<(), EngineError> {
        let entry = self.entry(handle)?;
        entry.update(blob).map_err(|e| {
            warn!(handle = %handle, error = %e, "chain update rejected");
            EngineError::from(e)
        })
    }

    /// Install an already validated config.
    pub fn install_chain(&self, handle: ChainHandle, config: ChainConfig) -> Result<(), EngineError> {
        self.entry(handle)?.install(config);
        Ok(())
    }

    /// The config new connections on `handle` would use right now.
    pub fn chain_config(&self, handle: ChainHandle) -> Result<Arc<ChainConfig>, EngineError> {
        Ok(self.entry(handle)?.snapshot())
    }

    /// Stop the entry's listener and release it. Returns false, and does
    /// nothing else, when the handle is unknown or already destroyed.
    pub async fn destroy_chain(&self, handle: ChainHandle) -> bool {
        let Some(entry) = self.store.remove(handle) else {
            debug!(handle = %handle, "destroy of unknown chain ignored");
            return false;
        };
        entry.listener.close(handle).await;
        info!(handle = %handle, "chain destroyed");
        true
    }

    /// Start the entry's local proxy. Returns the bound address.
    pub async fn start_local_proxy(
        &self,
        handle: ChainHandle,
        options: ListenerOptions,
    ) -> Result<SocketAddr, EngineError> {
        let entry = self.entry(handle)?;
        entry
            .listener
            .start(handle, options, entry.shared(), self.builder.clone())
            .await
    }

    /// Stop the entry's local proxy. Stopping a stopped listener is a no-op.
    pub async fn stop_local_proxy(&self, handle: ChainHandle) -> Result<(), EngineError> {
        let entry = self.entry(handle)?;
        if !entry.listener.stop(handle).await {
            debug!(handle = %handle, "stop requested but no listener running");
        }
        Ok(())
    }

    pub fn listener_state(&self, handle: ChainHandle) -> Result<ListenerState, EngineError> {
        Ok(self.entry(handle)?.listener.state())
    }

    pub async fn listener_addr(&self, handle: ChainHandle) -> Result<Option<SocketAddr>, EngineError> {
        Ok(self.entry(handle)?.listener.local_addr().await)
    }

    pub fn counters(&self, handle: ChainHandle) -> Result<CounterSnapshot, EngineError> {
        Ok(self.entry(handle)?.counters())
    }

    pub fn handles(&self) -> Vec<ChainHandle> {
        self.store.handles()
    }

    /// Destroy every entry.
    pub async fn shutdown(&self) {
        for handle in self.store.handles() {
            self.destroy_chain(handle).await;
        }
    }
}
