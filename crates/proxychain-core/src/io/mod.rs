//! I/O utilities shared by the tunnel builder and the local listener.

mod prefixed;
mod splice;

pub use prefixed::PrefixedStream;
pub use splice::{NoopCounter, SpliceStats, TrafficCounter, splice};
