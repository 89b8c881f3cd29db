//! # proxychain
//!
//! Forward local connections through ordered chains of upstream proxies.
//!
//! ## Crates
//!
//! - [`proxychain_core`] - Shared defaults, addresses and I/O primitives
//! - [`proxychain_config`] - Chain blob parsing, validation and config files
//! - [`proxychain_tunnel`] - Hop-by-hop tunnel construction
//! - [`proxychain_engine`] - Chain registry, local proxy and socket factory

pub use proxychain_config as config;
pub use proxychain_core as core;
pub use proxychain_engine as engine;
pub use proxychain_tunnel as tunnel;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use proxychain_config::{ChainConfig, HopDescriptor, HopKind, ParseError};
    pub use proxychain_core::Address;
    pub use proxychain_engine::{
        ChainHandle, EngineError, ListenerOptions, ProxyChain, ProxyEngine,
    };
    pub use proxychain_tunnel::{TunnelBuilder, TunnelError, TunnelStream};
}
