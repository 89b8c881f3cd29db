//! HTTP CONNECT client handshake.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use proxychain_config::Credentials;
use proxychain_core::{Address, defaults::MAX_HTTP_HEADER_BYTES};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::HopFailure;

/// Ask the HTTP proxy at the far end of `stream` to open a tunnel to `target`.
///
/// The response head is read one byte at a time so that no tunnel bytes
/// sent right after it are consumed.
pub async fn connect<S>(
    stream: &mut S,
    target: &Address,
    credentials: Option<&Credentials>,
) -> Result<(), HopFailure>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
    if let Some(creds) = credentials {
        let token = STANDARD.encode(format!("{}:{}", creds.username, creds.password));
        request.push_str(&format!("Proxy-Authorization: Basic {token}\r\n"));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let head = read_response_head(stream).await?;
    let status_line = head.lines().next().unwrap_or_default().trim_end();
    match parse_status(status_line) {
        Some(code) if (200..300).contains(&code) => Ok(()),
        Some(407) => Err(HopFailure::AuthRejected),
        Some(_) => Err(HopFailure::Rejected(status_line.to_string())),
        None => Err(HopFailure::Protocol(format!(
            "malformed status line {status_line:?}"
        ))),
    }
}

async fn read_response_head<S>(stream: &mut S) -> Result<String, HopFailure>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(128);
    loop {
        let byte = stream.read_u8().await?;
        head.push(byte);
        if head.ends_with(b"\r\n\r\n") {
            break;
        }
        if head.len() >= MAX_HTTP_HEADER_BYTES {
            return Err(HopFailure::Protocol(format!(
                "response head exceeds {MAX_HTTP_HEADER_BYTES} bytes"
            )));
        }
    }
    String::from_utf8(head).map_err(|_| HopFailure::Protocol("response head is not UTF-8".into()))
}

fn parse_status(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/1.") {
        return None;
    }
    let code = parts.next()?;
    if code.len() != 3 {
        return None;
    }
    code.parse().ok()
}
