//! Core types and constants shared across proxychain crates.
//!
//! This crate provides:
//! - Default configuration values
//! - Error class constants for logging
//! - The destination [`Address`] type used by every hop protocol
//! - SOCKS5 wire constants and address decoding
//! - I/O primitives: bidirectional splice and prefixed replay streams

pub mod address;
pub mod defaults;
pub mod errors;
pub mod io;
pub mod socks5;

pub use address::{Address, AddressError, Host};
pub use defaults::*;
pub use errors::*;

/// Project name.
pub const PROJECT_NAME: &str = "proxychain";
/// Project version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
