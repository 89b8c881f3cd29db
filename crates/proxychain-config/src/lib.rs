//! Chain configuration for proxychain.
//!
//! A chain configuration travels as a base64-encoded text blob. The decoded
//! text may be JSON, TOML, or one hop URI per line. Whatever the format, it
//! is parsed into [`RawChain`] and validated into an immutable
//! [`ChainConfig`]; a blob either validates completely or is rejected with a
//! [`ParseError`] naming the hop and field at fault.

mod blob;
mod cli;
mod defaults;
mod error;
mod loader;
mod types;
mod validate;

pub use blob::{decode_blob, encode_blob, parse_text};
pub use cli::{CliOverrides, apply_overrides};
pub use error::ParseError;
pub use loader::{ConfigError, load_file_config};
pub use types::{
    ChainConfig, Credentials, DnsMode, FileConfig, HopDescriptor, HopKind, ListenerConfig,
    LoggingConfig, RawChain, RawHop, RawRetry, RetryPolicy,
};
pub use validate::validate_chain;
