//! Client-facing protocols of the local listener.
//!
//! The first byte decides the protocol: `0x05` is a SOCKS5 greeting,
//! anything else is read as an HTTP proxy request.

mod http;
mod socks5;

use bytes::Bytes;
use proxychain_core::Address;
use proxychain_core::socks5::VERSION;
use proxychain_tunnel::TunnelError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::auth::LocalAuthCredential;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClientProtocol {
    Socks5,
    /// `CONNECT host:port`
    HttpConnect,
    /// Absolute-form request forwarded as origin-form.
    HttpForward,
}

impl ClientProtocol {
    pub fn name(self) -> &'static str {
        match self {
            ClientProtocol::Socks5 => "socks5",
            ClientProtocol::HttpConnect => "http-connect",
            ClientProtocol::HttpForward => "http-forward",
        }
    }
}

/// What a local client asked for.
#[derive(Debug)]
pub(crate) struct InboundRequest {
    pub target: Address,
    pub protocol: ClientProtocol,
    /// Bytes to send into the tunnel before relaying the client stream.
    pub forward: Bytes,
}

/// Run the inbound handshake: protocol sniff, optional auth, request.
///
/// Auth and protocol failures have already been answered on `stream`
/// when this returns an error.
pub(crate) async fn accept<S>(
    stream: &mut S,
    auth: Option<&LocalAuthCredential>,
) -> Result<InboundRequest, EngineError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let first = stream.read_u8().await?;
    if first == VERSION {
        socks5::accept(stream, auth).await
    } else {
        http::accept(stream, first, auth).await
    }
}

/// Tell the client its tunnel is ready.
pub(crate) async fn reply_success<S>(stream: &mut S, request: &InboundRequest) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    match request.protocol {
        ClientProtocol::Socks5 => {
            socks5::send_reply(stream, proxychain_core::socks5::REPLY_SUCCEEDED).await
        }
        ClientProtocol::HttpConnect => http::send_established(stream).await,
        // The origin's own response is the reply.
        ClientProtocol::HttpForward => Ok(()),
    }
}

/// Tell the client its tunnel could not be built.
pub(crate) async fn reply_failure<S>(
    stream: &mut S,
    request: &InboundRequest,
    error: &TunnelError,
) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    match request.protocol {
        ClientProtocol::Socks5 => socks5::send_reply(stream, socks5::reply_code_for(error)).await,
        ClientProtocol::HttpConnect | ClientProtocol::HttpForward => {
            http::send_gateway_error(stream, error).await
        }
    }
}
