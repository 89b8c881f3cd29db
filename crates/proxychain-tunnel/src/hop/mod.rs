//! Per-hop handshakes.
//!
//! Every hop kind answers the same request: over the stream built so far,
//! extend the tunnel to the next address. `https` hops first attach a TLS
//! session with the proxy, then speak HTTP CONNECT inside it.

pub mod http;
pub mod socks5;

use proxychain_config::{HopDescriptor, HopKind};
use proxychain_core::Address;

use crate::error::HopFailure;
use crate::tls::TlsConnectors;
use crate::transport::TunnelStream;

/// Run hop `hop`'s full handshake over `stream`, leaving it connected to
/// `next`. On failure the stream is dropped, closing it.
pub(crate) async fn handshake(
    stream: TunnelStream,
    hop: &HopDescriptor,
    next: &Address,
    tls: &TlsConnectors,
) -> Result<TunnelStream, HopFailure> {
    let mut stream = attach(stream, hop, tls).await?;
    extend(&mut stream, hop, next).await?;
    Ok(stream)
}

async fn attach(
    stream: TunnelStream,
    hop: &HopDescriptor,
    tls: &TlsConnectors,
) -> Result<TunnelStream, HopFailure> {
    match hop.kind {
        HopKind::Https => tls.attach(stream, &hop.host, hop.skip_verify).await,
        HopKind::Socks5 | HopKind::Http => Ok(stream),
    }
}

async fn extend(
    stream: &mut TunnelStream,
    hop: &HopDescriptor,
    next: &Address,
) -> Result<(), HopFailure> {
    let credentials = hop.credentials.as_ref();
    match hop.kind {
        HopKind::Socks5 => socks5::connect(stream, next, credentials).await,
        HopKind::Http | HopKind::Https => http::connect(stream, next, credentials).await,
    }
}
