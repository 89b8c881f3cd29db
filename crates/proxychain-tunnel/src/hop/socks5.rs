//! SOCKS5 client handshake (RFC 1928, RFC 1929).

use bytes::{BufMut, BytesMut};
use proxychain_config::Credentials;
use proxychain_core::Address;
use proxychain_core::socks5::{
    AUTH_SUCCESS, AUTH_VERSION, CMD_CONNECT, METHOD_NO_ACCEPTABLE, METHOD_NO_AUTH,
    METHOD_USER_PASS, REPLY_SUCCEEDED, VERSION, read_address, reply_text,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::HopFailure;

/// Ask the SOCKS5 proxy at the far end of `stream` to connect to `target`.
///
/// Only the method matching the configured credentials is offered. On
/// success the stream carries raw bytes to `target`.
pub async fn connect<S>(
    stream: &mut S,
    target: &Address,
    credentials: Option<&Credentials>,
) -> Result<(), HopFailure>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let method = if credentials.is_some() {
        METHOD_USER_PASS
    } else {
        METHOD_NO_AUTH
    };
    stream.write_all(&[VERSION, 1, method]).await?;
    stream.flush().await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != VERSION {
        return Err(HopFailure::Protocol(format!(
            "unexpected SOCKS version {:#04x}",
            choice[0]
        )));
    }
    match (choice[1], credentials) {
        (METHOD_NO_ACCEPTABLE, _) => return Err(HopFailure::AuthRejected),
        (m, _) if m != method => {
            return Err(HopFailure::Protocol(format!(
                "proxy chose unoffered method {m:#04x}"
            )));
        }
        (METHOD_USER_PASS, Some(creds)) => authenticate(stream, creds).await?,
        _ => {}
    }

    let mut request = BytesMut::with_capacity(4 + 1 + 255 + 2);
    request.put_slice(&[VERSION, CMD_CONNECT, 0x00]);
    target
        .write_socks5(&mut request)
        .map_err(|e| HopFailure::Protocol(e.to_string()))?;
    stream.write_all(&request).await?;
    stream.flush().await?;

    // VER REP RSV ATYP
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    if header[0] != VERSION {
        return Err(HopFailure::Protocol(format!(
            "unexpected SOCKS version {:#04x} in reply",
            header[0]
        )));
    }
    if header[1] != REPLY_SUCCEEDED {
        return Err(HopFailure::Rejected(format!(
            "SOCKS5 reply {:#04x} ({}) for {target}",
            header[1],
            reply_text(header[1])
        )));
    }
    // Bound address is not used, but must be consumed.
    if read_address(stream, header[3]).await?.is_none() {
        return Err(HopFailure::Protocol(format!(
            "unknown address type {:#04x} in reply",
            header[3]
        )));
    }
    Ok(())
}

async fn authenticate<S>(stream: &mut S, creds: &Credentials) -> Result<(), HopFailure>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let user = creds.username.as_bytes();
    let pass = creds.password.as_bytes();
    if user.len() > 255 || pass.len() > 255 {
        return Err(HopFailure::Protocol("credential longer than 255 bytes".into()));
    }

    let mut buf = BytesMut::with_capacity(3 + user.len() + pass.len());
    buf.put_u8(AUTH_VERSION);
    buf.put_u8(user.len() as u8);
    buf.put_slice(user);
    buf.put_u8(pass.len() as u8);
    buf.put_slice(pass);
    stream.write_all(&buf).await?;
    stream.flush().await?;

    let mut status = [0u8; 2];
    stream.read_exact(&mut status).await?;
    if status[1] != AUTH_SUCCESS {
        return Err(HopFailure::AuthRejected);
    }
    Ok(())
}
