//! Chain, listener and logging configuration types.
//!
//! `Raw*` types mirror the wire schema one-to-one and carry unvalidated
//! values; [`ChainConfig`] is only ever produced by validation.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use proxychain_core::{Address, Host, defaults};
use serde::{Deserialize, Serialize};

use crate::defaults::*;

// ============================================================================
// Wire schema
// ============================================================================

/// Chain configuration as written in a blob or config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawChain {
    #[serde(default)]
    pub hops: Vec<RawHop>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hop_timeout_secs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RawRetry>,
}

/// One hop as written in a blob or config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawHop {
    pub kind: String,
    pub host: String,
    pub port: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_verify: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRetry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<i64>,
}

// ============================================================================
// Validated chain
// ============================================================================

/// Upstream proxy protocol spoken by a hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HopKind {
    Socks5,
    /// Plain HTTP CONNECT.
    Http,
    /// HTTP CONNECT over a TLS session with the proxy.
    Https,
}

impl HopKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HopKind::Socks5 => "socks5",
            HopKind::Http => "http",
            HopKind::Https => "https",
        }
    }

    /// Port assumed when a hop URI omits one.
    pub fn default_port(&self) -> u16 {
        match self {
            HopKind::Socks5 => defaults::DEFAULT_SOCKS5_PORT,
            HopKind::Http | HopKind::Https => defaults::DEFAULT_HTTP_PROXY_PORT,
        }
    }
}

impl FromStr for HopKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "socks5" | "socks5h" => Ok(HopKind::Socks5),
            "http" => Ok(HopKind::Http),
            "https" => Ok(HopKind::Https),
            _ => Err(()),
        }
    }
}

impl fmt::Display for HopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Username/password pair for a hop or the local listener.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One validated upstream proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopDescriptor {
    pub kind: HopKind,
    pub host: Host,
    pub port: u16,
    pub credentials: Option<Credentials>,
    /// Overrides the chain's per-hop timeout for this hop.
    pub timeout: Option<Duration>,
    /// Accept any certificate from an `https` hop.
    pub skip_verify: bool,
}

impl HopDescriptor {
    pub fn new(kind: HopKind, host: Host, port: u16) -> Self {
        Self {
            kind,
            host,
            port,
            credentials: None,
            timeout: None,
            skip_verify: false,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn address(&self) -> Address {
        Address::new(self.host.clone(), self.port)
    }
}

/// Where destination domain names are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DnsMode {
    /// The last hop resolves the destination.
    #[default]
    Remote,
    /// Resolve on this host and hand the last hop an IP address.
    Local,
}

impl DnsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DnsMode::Remote => "remote",
            DnsMode::Local => "local",
        }
    }
}

/// Whole-build retry policy. `attempts == 1` means no retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: defaults::DEFAULT_RETRY_ATTEMPTS,
            backoff: Duration::from_millis(defaults::DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

/// Validated, immutable chain configuration.
///
/// Zero hops means direct connect. Instances are shared behind `Arc` and
/// replaced wholesale on update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub hops: Vec<HopDescriptor>,
    /// Bound on a whole tunnel build, all hops included.
    pub connect_timeout: Duration,
    /// Bound on each hop unless the hop overrides it.
    pub hop_timeout: Duration,
    pub dns: DnsMode,
    pub retry: RetryPolicy,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::direct()
    }
}

impl ChainConfig {
    /// The zero-hop configuration every new chain starts with.
    pub fn direct() -> Self {
        Self {
            hops: Vec::new(),
            connect_timeout: Duration::from_secs(defaults::DEFAULT_CONNECT_TIMEOUT_SECS),
            hop_timeout: Duration::from_secs(defaults::DEFAULT_HOP_TIMEOUT_SECS),
            dns: DnsMode::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_hops(hops: Vec<HopDescriptor>) -> Self {
        Self {
            hops,
            ..Self::direct()
        }
    }

    pub fn is_direct(&self) -> bool {
        self.hops.is_empty()
    }

    /// Effective handshake timeout for hop `index`.
    pub fn timeout_for(&self, index: usize) -> Duration {
        self.hops
            .get(index)
            .and_then(|h| h.timeout)
            .unwrap_or(self.hop_timeout)
    }

    /// Parse a base64 transport blob.
    pub fn parse(blob: &str) -> Result<Self, crate::ParseError> {
        crate::blob::decode_blob(blob)
    }

    /// Encode as a base64 blob that [`ChainConfig::parse`] accepts.
    pub fn encode(&self) -> String {
        crate::blob::encode_blob(self)
    }

    /// Convert back to the wire schema.
    pub fn to_raw(&self) -> RawChain {
        RawChain {
            hops: self
                .hops
                .iter()
                .map(|hop| RawHop {
                    kind: hop.kind.as_str().to_string(),
                    host: hop.host.to_string(),
                    port: i64::from(hop.port),
                    username: hop.credentials.as_ref().map(|c| c.username.clone()),
                    password: hop.credentials.as_ref().map(|c| c.password.clone()),
                    timeout_secs: hop.timeout.map(|t| t.as_secs() as i64),
                    skip_verify: hop.skip_verify.then_some(true),
                })
                .collect(),
            connect_timeout_secs: Some(self.connect_timeout.as_secs() as i64),
            hop_timeout_secs: Some(self.hop_timeout.as_secs() as i64),
            dns: Some(self.dns.as_str().to_string()),
            retry: Some(RawRetry {
                attempts: Some(i64::from(self.retry.attempts)),
                backoff_ms: Some(self.retry.backoff.as_millis() as i64),
            }),
        }
    }
}

// ============================================================================
// Listener and logging (config file sections)
// ============================================================================

/// Local listener options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    #[serde(default = "default_listen_host")]
    pub host: String,
    #[serde(default = "default_socks5_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Concurrent client connection ceiling; excess connections are closed.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Bound on the inbound auth plus request handshake.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// Close a relay after this long without traffic in either direction.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// How long `stop` waits for in-flight connections.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
    #[serde(default = "default_relay_buffer_size")]
    pub relay_buffer_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: default_listen_host(),
            port: default_socks5_port(),
            username: None,
            password: None,
            max_connections: default_max_connections(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            drain_timeout_secs: default_drain_timeout_secs(),
            relay_buffer_size: default_relay_buffer_size(),
        }
    }
}

impl ListenerConfig {
    /// Local auth credentials, when both halves are configured.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some(Credentials::new(u.clone(), p.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: Option<String>,
    /// Log format: json, pretty, or compact. Default: pretty.
    pub format: Option<String>,
    /// Output target: stdout or stderr. Default: stderr.
    pub output: Option<String>,
    /// Per-module log level filters (e.g., {"proxychain_tunnel": "debug"}).
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

/// Top-level CLI config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub chain: RawChain,
    #[serde(default)]
    pub logging: LoggingConfig,
}
