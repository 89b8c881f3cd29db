//! Error class constants for logging.
//!
//! These constants give every crate the same vocabulary when tagging
//! failures in structured log fields.

/// Boundary argument rejected before reaching the engine.
pub const ERROR_INVALID_ARGUMENT: &str = "invalid_argument";
/// Handle not found or already destroyed.
pub const ERROR_UNKNOWN_HANDLE: &str = "unknown_handle";
/// Chain configuration could not be decoded or validated.
pub const ERROR_PARSE: &str = "parse";
/// Listener port unavailable.
pub const ERROR_BIND: &str = "bind";
/// Inbound client credentials rejected.
pub const ERROR_AUTH: &str = "auth";
/// A hop failed to connect or handshake.
pub const ERROR_TUNNEL: &str = "tunnel";
/// Transport failure after establishment.
pub const ERROR_IO: &str = "io";
/// Timeout error.
pub const ERROR_TIMEOUT: &str = "timeout";
/// Client-facing protocol violation.
pub const ERROR_PROTOCOL: &str = "protocol";
/// Destination URI could not be parsed.
pub const ERROR_URI: &str = "uri";
