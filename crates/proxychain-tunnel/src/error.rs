//! Tunnel build errors.

use std::fmt;
use std::io::{self, ErrorKind};

use proxychain_core::errors;

/// Why a single hop (or the direct connect) failed.
#[derive(Debug, thiserror::Error)]
pub enum HopFailure {
    #[error("timed out")]
    Timeout,
    #[error("connection refused")]
    Refused,
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("rejected by proxy: {0}")]
    Rejected(String),
    #[error("proxy rejected credentials")]
    AuthRejected,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("tls: {0}")]
    Tls(String),
    #[error("io: {0}")]
    Io(#[source] io::Error),
    #[error("cannot resolve {0}")]
    Resolve(String),
}

impl From<io::Error> for HopFailure {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            ErrorKind::TimedOut => HopFailure::Timeout,
            ErrorKind::ConnectionRefused => HopFailure::Refused,
            ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable => {
                HopFailure::Unreachable(err.to_string())
            }
            _ => HopFailure::Io(err),
        }
    }
}

impl HopFailure {
    /// Transport-level failures that may succeed on a fresh attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HopFailure::Timeout | HopFailure::Refused | HopFailure::Unreachable(_) | HopFailure::Io(_)
        )
    }

    /// Error class for structured logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            HopFailure::Timeout => errors::ERROR_TIMEOUT,
            HopFailure::AuthRejected => errors::ERROR_AUTH,
            HopFailure::Protocol(_) | HopFailure::Rejected(_) | HopFailure::Tls(_) => {
                errors::ERROR_PROTOCOL
            }
            HopFailure::Io(_) => errors::ERROR_IO,
            HopFailure::Refused | HopFailure::Unreachable(_) | HopFailure::Resolve(_) => {
                errors::ERROR_TUNNEL
            }
        }
    }
}

/// A failed tunnel build.
///
/// `hop` is the index of the hop whose connect or handshake failed, or
/// `None` when the failure concerns the destination itself (direct connect
/// or local resolution).
#[derive(Debug, thiserror::Error)]
pub struct TunnelError {
    pub hop: Option<usize>,
    #[source]
    pub cause: HopFailure,
}

impl TunnelError {
    pub fn at_hop(index: usize, cause: HopFailure) -> Self {
        Self {
            hop: Some(index),
            cause,
        }
    }

    pub fn at_destination(cause: HopFailure) -> Self {
        Self { hop: None, cause }
    }

    pub fn is_retryable(&self) -> bool {
        self.cause.is_retryable()
    }
}

impl fmt::Display for TunnelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hop {
            Some(i) => write!(f, "hop {i}: {}", self.cause),
            None => write!(f, "destination: {}", self.cause),
        }
    }
}
