//! Destination addresses shared by the hop protocols and the local listener.
//!
//! An [`Address`] is either an IP socket address or a domain name plus port.
//! Domains are kept unresolved so the last hop of a chain can resolve them.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::defaults::MAX_DOMAIN_LEN;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// Errors produced while parsing an address or URI.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("missing port in {0:?}")]
    MissingPort(String),
    #[error("invalid port {0:?}")]
    InvalidPort(String),
    #[error("invalid host {0:?}")]
    InvalidHost(String),
    #[error("domain longer than {MAX_DOMAIN_LEN} bytes")]
    DomainTooLong,
    #[error("invalid URI {0:?}")]
    InvalidUri(String),
}

/// Host part of a destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Host {
    Ip(IpAddr),
    Domain(String),
}

impl Host {
    /// Parse a host literal. Brackets around IPv6 literals are accepted.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let raw = raw.trim();
        let unbracketed = raw
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .unwrap_or(raw);
        if unbracketed.is_empty() {
            return Err(AddressError::Empty);
        }
        if let Ok(ip) = unbracketed.parse::<IpAddr>() {
            return Ok(Host::Ip(ip));
        }
        if unbracketed.len() > MAX_DOMAIN_LEN {
            return Err(AddressError::DomainTooLong);
        }
        if unbracketed
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '@' | '[' | ']' | '?' | '#'))
        {
            return Err(AddressError::InvalidHost(raw.to_string()));
        }
        Ok(Host::Domain(unbracketed.to_ascii_lowercase()))
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Ip(IpAddr::V6(ip)) => write!(f, "[{ip}]"),
            Host::Ip(IpAddr::V4(ip)) => write!(f, "{ip}"),
            Host::Domain(d) => f.write_str(d),
        }
    }
}

/// A destination: host plus port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub host: Host,
    pub port: u16,
}

impl Address {
    pub fn new(host: Host, port: u16) -> Self {
        Self { host, port }
    }

    /// Build an address from a host string (domain or IP literal) and port.
    pub fn from_host_port(host: &str, port: u16) -> Result<Self, AddressError> {
        Ok(Self {
            host: Host::parse(host)?,
            port,
        })
    }

    /// Parse `host:port`, `[v6]:port` or `a.b.c.d:port`.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AddressError::Empty);
        }
        if let Ok(sa) = raw.parse::<SocketAddr>() {
            return Ok(sa.into());
        }
        let (host, port) = split_host_port(raw)?;
        let port = port.ok_or_else(|| AddressError::MissingPort(raw.to_string()))?;
        Self::from_host_port(host, parse_port(port)?)
    }

    /// Parse a destination URI such as `https://example.com/path` or a bare
    /// `host:port`. When the URI omits the port, the scheme's well-known port
    /// is used.
    pub fn parse_uri(raw: &str) -> Result<Self, AddressError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AddressError::Empty);
        }
        let Some((scheme, rest)) = raw.split_once("://") else {
            return Self::parse(raw);
        };
        let scheme = scheme.to_ascii_lowercase();
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) {
            return Err(AddressError::InvalidUri(raw.to_string()));
        }
        let authority = rest
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default();
        // Drop any userinfo; credentials never travel in the destination.
        let authority = authority.rsplit_once('@').map_or(authority, |(_, a)| a);
        if authority.is_empty() {
            return Err(AddressError::InvalidUri(raw.to_string()));
        }
        let (host, port) = split_host_port(authority)?;
        let port = match port {
            Some(p) => parse_port(p)?,
            None => default_port_for_scheme(&scheme)
                .ok_or_else(|| AddressError::MissingPort(raw.to_string()))?,
        };
        Self::from_host_port(host, port)
    }

    /// Returns the socket address when the host is an IP literal.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self.host {
            Host::Ip(ip) => Some(SocketAddr::new(ip, self.port)),
            Host::Domain(_) => None,
        }
    }

    /// Returns the domain name, if any.
    pub fn domain(&self) -> Option<&str> {
        match &self.host {
            Host::Domain(d) => Some(d),
            Host::Ip(_) => None,
        }
    }

    /// Host string without IPv6 brackets, suitable for TLS SNI or DNS lookups.
    pub fn host_str(&self) -> String {
        match &self.host {
            Host::Ip(ip) => ip.to_string(),
            Host::Domain(d) => d.clone(),
        }
    }

    /// Encode as SOCKS5 `ATYP | ADDR | PORT`.
    pub fn write_socks5(&self, buf: &mut BytesMut) -> Result<(), AddressError> {
        match &self.host {
            Host::Ip(IpAddr::V4(ip)) => {
                buf.put_u8(ATYP_IPV4);
                buf.put_slice(&ip.octets());
            }
            Host::Ip(IpAddr::V6(ip)) => {
                buf.put_u8(ATYP_IPV6);
                buf.put_slice(&ip.octets());
            }
            Host::Domain(d) => {
                if d.len() > MAX_DOMAIN_LEN {
                    return Err(AddressError::DomainTooLong);
                }
                buf.put_u8(ATYP_DOMAIN);
                buf.put_u8(d.len() as u8);
                buf.put_slice(d.as_bytes());
            }
        }
        buf.put_u16(self.port);
        Ok(())
    }
}

impl From<SocketAddr> for Address {
    fn from(sa: SocketAddr) -> Self {
        Self {
            host: Host::Ip(sa.ip()),
            port: sa.port(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Well-known ports for the URI schemes a host application commonly dials.
pub fn default_port_for_scheme(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        "ftp" => Some(21),
        "ssh" => Some(22),
        "socks5" | "socks5h" => Some(crate::defaults::DEFAULT_SOCKS5_PORT),
        _ => None,
    }
}

/// Split `host[:port]`, handling bracketed IPv6 literals.
pub fn split_host_port(raw: &str) -> Result<(&str, Option<&str>), AddressError> {
    if let Some(stripped) = raw.strip_prefix('[') {
        let end = stripped
            .find(']')
            .ok_or_else(|| AddressError::InvalidHost(raw.to_string()))?;
        let host = &raw[..end + 2];
        let rest = &stripped[end + 1..];
        return match rest.strip_prefix(':') {
            Some(port) => Ok((host, Some(port))),
            None if rest.is_empty() => Ok((host, None)),
            None => Err(AddressError::InvalidHost(raw.to_string())),
        };
    }
    match raw.matches(':').count() {
        0 => Ok((raw, None)),
        1 => {
            let (host, port) = raw.split_once(':').unwrap_or((raw, ""));
            Ok((host, Some(port)))
        }
        // Bare IPv6 without brackets carries no port.
        _ => Ok((raw, None)),
    }
}

fn parse_port(raw: &str) -> Result<u16, AddressError> {
    match raw.parse::<u16>() {
        Ok(0) | Err(_) => Err(AddressError::InvalidPort(raw.to_string())),
        Ok(p) => Ok(p),
    }
}
