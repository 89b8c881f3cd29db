//! Chain registry, local proxy listener and socket factory.
//!
//! [`ProxyEngine`] is the async API: it creates chain entries, swaps their
//! configs, runs at most one local proxy per entry and dials destinations
//! through an entry's chain. [`ProxyChain`] wraps it for a blocking caller
//! that speaks in `i64` handles and `i32` status codes.
//!
//! The local proxy speaks SOCKS5 and HTTP (`CONNECT` plus absolute-form
//! requests) on the same port, telling them apart by the first byte.

mod auth;
mod boundary;
pub mod cli;
mod engine;
pub mod error;
mod inbound;
mod listener;
mod socket;
mod stats;
mod store;
mod util;

pub use auth::LocalAuthCredential;
pub use boundary::ProxyChain;
pub use engine::ProxyEngine;
pub use error::EngineError;
pub use listener::{ListenerOptions, ListenerState};
pub use stats::{ChainCounters, CounterSnapshot};
pub use store::{ChainEntry, ChainHandle, ChainStore};
