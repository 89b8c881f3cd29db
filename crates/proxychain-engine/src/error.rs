//! Engine error types and boundary status codes.

use std::io;

use proxychain_config::ParseError;
use proxychain_core::{AddressError, errors};
use proxychain_tunnel::TunnelError;

use crate::store::ChainHandle;

pub const STATUS_OK: i32 = 0;
pub const STATUS_INVALID_ARGUMENT: i32 = -1;
pub const STATUS_UNKNOWN_HANDLE: i32 = -2;
pub const STATUS_PARSE_ERROR: i32 = -3;
pub const STATUS_BIND_FAILURE: i32 = -4;
pub const STATUS_ALREADY_RUNNING: i32 = -5;
pub const STATUS_TUNNEL_FAILURE: i32 = -6;
pub const STATUS_IO_FAILURE: i32 = -7;
pub const STATUS_URI_ERROR: i32 = -8;

/// Engine error type.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unknown chain handle {0}")]
    UnknownHandle(ChainHandle),
    #[error("config: {0}")]
    Parse(#[from] ParseError),
    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("chain {0} already has a running listener")]
    AlreadyRunning(ChainHandle),
    #[error("local client authentication failed")]
    AuthFailed,
    #[error("tunnel: {0}")]
    Tunnel(#[from] TunnelError),
    #[error("uri: {0}")]
    Uri(#[from] AddressError),
    #[error("client protocol: {0}")]
    Protocol(String),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl EngineError {
    /// Stable status code reported across the boundary.
    pub fn status_code(&self) -> i32 {
        match self {
            EngineError::InvalidArgument(_) => STATUS_INVALID_ARGUMENT,
            EngineError::UnknownHandle(_) => STATUS_UNKNOWN_HANDLE,
            EngineError::Parse(_) => STATUS_PARSE_ERROR,
            EngineError::Bind { .. } => STATUS_BIND_FAILURE,
            EngineError::AlreadyRunning(_) => STATUS_ALREADY_RUNNING,
            EngineError::Tunnel(_) => STATUS_TUNNEL_FAILURE,
            EngineError::Uri(_) => STATUS_URI_ERROR,
            EngineError::AuthFailed | EngineError::Protocol(_) | EngineError::Io(_) => {
                STATUS_IO_FAILURE
            }
        }
    }

    /// Error class for structured logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            EngineError::InvalidArgument(_) => errors::ERROR_INVALID_ARGUMENT,
            EngineError::UnknownHandle(_) => errors::ERROR_UNKNOWN_HANDLE,
            EngineError::Parse(_) => errors::ERROR_PARSE,
            EngineError::Bind { .. } | EngineError::AlreadyRunning(_) => errors::ERROR_BIND,
            EngineError::AuthFailed => errors::ERROR_AUTH,
            EngineError::Tunnel(e) => e.cause.error_type(),
            EngineError::Uri(_) => errors::ERROR_URI,
            EngineError::Protocol(_) => errors::ERROR_PROTOCOL,
            EngineError::Io(_) => errors::ERROR_IO,
        }
    }
}
