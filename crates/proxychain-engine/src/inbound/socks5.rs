//! SOCKS5 server side (RFC 1928 CONNECT, RFC 1929 username/password).

use bytes::Bytes;
use proxychain_core::socks5::{
    AUTH_FAILURE, AUTH_SUCCESS, AUTH_VERSION, CMD_CONNECT, METHOD_NO_ACCEPTABLE, METHOD_NO_AUTH,
    METHOD_USER_PASS, REPLY_ADDRESS_TYPE_NOT_SUPPORTED, REPLY_COMMAND_NOT_SUPPORTED,
    REPLY_CONNECTION_REFUSED, REPLY_GENERAL_FAILURE, REPLY_HOST_UNREACHABLE,
    REPLY_NETWORK_UNREACHABLE, REPLY_TTL_EXPIRED, VERSION, read_address,
};
use proxychain_tunnel::{HopFailure, TunnelError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{ClientProtocol, InboundRequest};
use crate::auth::LocalAuthCredential;
use crate::error::EngineError;

/// Continue a SOCKS5 handshake whose version byte was already read.
pub(super) async fn accept<S>(
    stream: &mut S,
    auth: Option<&LocalAuthCredential>,
) -> Result<InboundRequest, EngineError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    negotiate_method(stream, auth).await?;

    // VER CMD RSV ATYP
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    if header[0] != VERSION {
        return Err(EngineError::Protocol(format!(
            "invalid socks version {:#04x} in request",
            header[0]
        )));
    }
    if header[1] != CMD_CONNECT {
        let _ = send_reply(stream, REPLY_COMMAND_NOT_SUPPORTED).await;
        return Err(EngineError::Protocol(format!(
            "unsupported socks command {:#04x}",
            header[1]
        )));
    }
    let Some(target) = read_address(stream, header[3]).await? else {
        let _ = send_reply(stream, REPLY_ADDRESS_TYPE_NOT_SUPPORTED).await;
        return Err(EngineError::Protocol(format!(
            "unsupported address type {:#04x}",
            header[3]
        )));
    };

    Ok(InboundRequest {
        target,
        protocol: ClientProtocol::Socks5,
        forward: Bytes::new(),
    })
}

/// Pick the one method this listener accepts and, for username/password,
/// run the sub-negotiation.
async fn negotiate_method<S>(
    stream: &mut S,
    auth: Option<&LocalAuthCredential>,
) -> Result<(), EngineError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let nmethods = stream.read_u8().await? as usize;
    let mut methods = vec![0u8; nmethods];
    stream.read_exact(&mut methods).await?;

    let required = if auth.is_some() {
        METHOD_USER_PASS
    } else {
        METHOD_NO_AUTH
    };
    if !methods.contains(&required) {
        let _ = stream.write_all(&[VERSION, METHOD_NO_ACCEPTABLE]).await;
        return Err(match auth {
            Some(_) => EngineError::AuthFailed,
            None => EngineError::Protocol("no acceptable socks method".into()),
        });
    }
    stream.write_all(&[VERSION, required]).await?;

    let Some(credential) = auth else {
        return Ok(());
    };

    // VER ULEN UNAME PLEN PASSWD
    let version = stream.read_u8().await?;
    if version != AUTH_VERSION {
        let _ = stream.write_all(&[AUTH_VERSION, AUTH_FAILURE]).await;
        return Err(EngineError::Protocol(format!(
            "invalid auth version {version:#04x}"
        )));
    }
    let ulen = stream.read_u8().await? as usize;
    let mut username = vec![0u8; ulen];
    stream.read_exact(&mut username).await?;
    let plen = stream.read_u8().await? as usize;
    let mut password = vec![0u8; plen];
    stream.read_exact(&mut password).await?;

    if credential.verify(&username, &password) {
        stream.write_all(&[AUTH_VERSION, AUTH_SUCCESS]).await?;
        Ok(())
    } else {
        let _ = stream.write_all(&[AUTH_VERSION, AUTH_FAILURE]).await;
        Err(EngineError::AuthFailed)
    }
}

/// Send a reply with a zeroed bind address (0.0.0.0:0).
pub(super) async fn send_reply<S>(stream: &mut S, reply: u8) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&[VERSION, reply, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await?;
    stream.flush().await
}

pub(super) fn reply_code_for(error: &TunnelError) -> u8 {
    match &error.cause {
        HopFailure::Refused => REPLY_CONNECTION_REFUSED,
        HopFailure::Timeout => REPLY_TTL_EXPIRED,
        HopFailure::Unreachable(_) => REPLY_NETWORK_UNREACHABLE,
        HopFailure::Resolve(_) => REPLY_HOST_UNREACHABLE,
        _ => REPLY_GENERAL_FAILURE,
    }
}
