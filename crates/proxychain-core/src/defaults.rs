//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// Chain Defaults
// ============================================================================

/// Maximum number of hops a chain may contain.
pub const MAX_CHAIN_HOPS: usize = 16;
/// Default timeout for a whole tunnel build in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
/// Default timeout for a single hop (connect + handshake) in seconds.
pub const DEFAULT_HOP_TIMEOUT_SECS: u64 = 10;
/// Default number of tunnel build attempts (1 = no retry).
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 1;
/// Upper bound for tunnel build attempts.
pub const MAX_RETRY_ATTEMPTS: u32 = 5;
/// Default delay between tunnel build attempts in milliseconds.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;

/// Default port for SOCKS5 hops when the hop URI omits one.
pub const DEFAULT_SOCKS5_PORT: u16 = 1080;
/// Default port for HTTP/HTTPS CONNECT hops when the hop URI omits one.
pub const DEFAULT_HTTP_PROXY_PORT: u16 = 8080;

// ============================================================================
// Listener Defaults
// ============================================================================

/// Default address the local proxy binds to.
pub const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";
/// Default ceiling of concurrent client connections per listener.
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;
/// Default inbound handshake (auth + request) timeout in seconds.
pub const DEFAULT_INBOUND_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
/// Default bounded drain on stop in seconds.
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 5;
/// Default TCP listener backlog.
pub const DEFAULT_CONNECTION_BACKLOG: u32 = 1024;

// ============================================================================
// Relay Defaults
// ============================================================================

/// Default idle timeout for spliced connections in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
/// Default splice buffer size per direction.
pub const DEFAULT_RELAY_BUFFER_SIZE: usize = 16 * 1024;

// ============================================================================
// TCP Socket Defaults
// ============================================================================

/// Default TCP_NODELAY (disable Nagle's algorithm for lower latency).
pub const DEFAULT_TCP_NO_DELAY: bool = true;
/// Default TCP Keep-Alive interval in seconds (0 = disabled).
pub const DEFAULT_TCP_KEEPALIVE_SECS: u64 = 300;

// ============================================================================
// Protocol Limits
// ============================================================================

/// Maximum bytes accepted for an HTTP request or response header block.
pub const MAX_HTTP_HEADER_BYTES: usize = 8192;
/// Maximum domain name length (SOCKS5 length byte).
pub const MAX_DOMAIN_LEN: usize = 255;
/// Maximum SOCKS5 username/password length (RFC 1929).
pub const MAX_CREDENTIAL_LEN: usize = 255;
