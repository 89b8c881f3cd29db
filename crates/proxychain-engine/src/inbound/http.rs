//! HTTP proxy server side: `CONNECT` tunnels and absolute-form forwarding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{BufMut, BytesMut};
use proxychain_core::{Address, AddressError};
use proxychain_core::defaults::MAX_HTTP_HEADER_BYTES;
use proxychain_tunnel::{HopFailure, TunnelError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{ClientProtocol, InboundRequest};
use crate::auth::LocalAuthCredential;
use crate::error::EngineError;

const RESPONSE_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";
const RESPONSE_BAD_REQUEST: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
const RESPONSE_AUTH_REQUIRED: &[u8] = b"HTTP/1.1 407 Proxy Authentication Required\r\n\
Proxy-Authenticate: Basic realm=\"proxychain\"\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
const RESPONSE_HEADER_TOO_LARGE: &[u8] = b"HTTP/1.1 431 Request Header Fields Too Large\r\n\
Content-Length: 0\r\nConnection: close\r\n\r\n";
const RESPONSE_BAD_GATEWAY: &[u8] =
    b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
const RESPONSE_GATEWAY_TIMEOUT: &[u8] =
    b"HTTP/1.1 504 Gateway Timeout\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// Hop-by-hop headers dropped when forwarding a plain request.
const STRIPPED_HEADERS: &[&str] = &["proxy-authorization", "proxy-connection", "connection"];

/// Read one request head (the first byte is already consumed) and turn it
/// into a tunnel request.
pub(super) async fn accept<S>(
    stream: &mut S,
    first: u8,
    auth: Option<&LocalAuthCredential>,
) -> Result<InboundRequest, EngineError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    buf.put_u8(first);
    let head_len = loop {
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
        if buf.len() >= MAX_HTTP_HEADER_BYTES {
            let _ = respond(stream, RESPONSE_HEADER_TOO_LARGE).await;
            return Err(EngineError::Protocol("request head too large".into()));
        }
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(EngineError::Protocol(
                "client closed before end of request head".into(),
            ));
        }
    };
    let head = buf.split_to(head_len);
    let body = buf.freeze();

    let request = match RequestHead::parse(&head) {
        Some(request) => request,
        None => {
            let _ = respond(stream, RESPONSE_BAD_REQUEST).await;
            return Err(EngineError::Protocol("malformed request head".into()));
        }
    };

    if let Some(credential) = auth {
        let authorized = request
            .header("proxy-authorization")
            .and_then(basic_credentials)
            .is_some_and(|(user, pass)| credential.verify(&user, &pass));
        if !authorized {
            let _ = respond(stream, RESPONSE_AUTH_REQUIRED).await;
            return Err(EngineError::AuthFailed);
        }
    }

    if request.method.eq_ignore_ascii_case("CONNECT") {
        let target = match Address::parse(request.target) {
            Ok(target) => target,
            Err(e) => {
                let _ = respond(stream, RESPONSE_BAD_REQUEST).await;
                return Err(EngineError::Uri(e));
            }
        };
        return Ok(InboundRequest {
            target,
            protocol: ClientProtocol::HttpConnect,
            forward: body,
        });
    }

    let Some((target, path)) = split_absolute_form(request.target) else {
        let _ = respond(stream, RESPONSE_BAD_REQUEST).await;
        return Err(EngineError::Protocol(format!(
            "expected absolute-form http target, got {:?}",
            request.target
        )));
    };
    let target = match target {
        Ok(target) => target,
        Err(e) => {
            let _ = respond(stream, RESPONSE_BAD_REQUEST).await;
            return Err(EngineError::Uri(e));
        }
    };

    let mut forward = BytesMut::with_capacity(head.len() + body.len());
    forward.put_slice(format!("{} {} {}\r\n", request.method, path, request.version).as_bytes());
    for (name, line) in request.header_lines() {
        if STRIPPED_HEADERS
            .iter()
            .any(|h| name.eq_ignore_ascii_case(h))
        {
            continue;
        }
        forward.put_slice(line.as_bytes());
        forward.put_slice(b"\r\n");
    }
    // One request per tunnel.
    forward.put_slice(b"Connection: close\r\n\r\n");
    forward.put_slice(&body);

    Ok(InboundRequest {
        target,
        protocol: ClientProtocol::HttpForward,
        forward: forward.freeze(),
    })
}

pub(super) async fn send_established<S>(stream: &mut S) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    respond(stream, RESPONSE_ESTABLISHED).await
}

pub(super) async fn send_gateway_error<S>(stream: &mut S, error: &TunnelError) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let response = match error.cause {
        HopFailure::Timeout => RESPONSE_GATEWAY_TIMEOUT,
        _ => RESPONSE_BAD_GATEWAY,
    };
    respond(stream, response).await
}

async fn respond<S>(stream: &mut S, response: &[u8]) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(response).await?;
    stream.flush().await
}

/// Length of the head including the terminating blank line.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

struct RequestHead<'a> {
    method: &'a str,
    target: &'a str,
    version: &'a str,
    lines: Vec<&'a str>,
}

impl<'a> RequestHead<'a> {
    fn parse(head: &'a [u8]) -> Option<Self> {
        let text = std::str::from_utf8(head).ok()?;
        let mut lines = text.split("\r\n").filter(|l| !l.is_empty());
        let mut parts = lines.next()?.split_ascii_whitespace();
        let method = parts.next()?;
        let target = parts.next()?;
        let version = parts.next()?;
        if parts.next().is_some() || !version.starts_with("HTTP/1.") {
            return None;
        }
        let lines: Vec<&str> = lines.collect();
        if lines.iter().any(|l| !l.contains(':')) {
            return None;
        }
        Some(Self {
            method,
            target,
            version,
            lines,
        })
    }

    /// `(name, full line)` for every header.
    fn header_lines(&self) -> impl Iterator<Item = (&'a str, &'a str)> + '_ {
        self.lines
            .iter()
            .filter_map(|line| line.split_once(':').map(|(name, _)| (name.trim(), *line)))
    }

    fn header(&self, wanted: &str) -> Option<&'a str> {
        self.lines.iter().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case(wanted)
                .then(|| value.trim())
        })
    }
}

/// Decode `Basic <base64(user:pass)>`.
fn basic_credentials(value: &str) -> Option<(Vec<u8>, Vec<u8>)> {
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let colon = decoded.iter().position(|&b| b == b':')?;
    Some((decoded[..colon].to_vec(), decoded[colon + 1..].to_vec()))
}

/// Split `http://authority/path?query` into its destination and the
/// origin-form path. `None` when the target is not an absolute http URI.
fn split_absolute_form(target: &str) -> Option<(Result<Address, AddressError>, String)> {
    let (scheme, rest) = target.split_once("://")?;
    if !scheme.eq_ignore_ascii_case("http") {
        return None;
    }
    let rest = rest.split('#').next().unwrap_or_default();
    let path = match rest.find(['/', '?']) {
        None => "/".to_string(),
        Some(i) if rest[i..].starts_with('?') => format!("/{}", &rest[i..]),
        Some(i) => rest[i..].to_string(),
    };
    Some((Address::parse_uri(target), path))
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;

    async fn run(
        raw: &'static [u8],
        auth: Option<LocalAuthCredential>,
    ) -> (Result<InboundRequest, EngineError>, Vec<u8>) {
        let (mut client, mut server) = duplex(16 * 1024);
        client.write_all(raw).await.unwrap();
        let first = server.read_u8().await.unwrap();
        let result = accept(&mut server, first, auth.as_ref()).await;
        drop(server);
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        (result, response)
    }

    #[tokio::test]
    async fn connect_request_keeps_early_data() {
        let (result, response) =
            run(b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\nhello", None)
                .await;
        let request = result.unwrap();
        assert_eq!(request.target, Address::parse("example.com:443").unwrap());
        assert_eq!(request.protocol, ClientProtocol::HttpConnect);
        assert_eq!(&request.forward[..], b"hello");
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn absolute_form_is_rewritten() {
        let (result, _) = run(
            b"GET http://example.com:8000/a/b?c=d HTTP/1.1\r\nHost: example.com:8000\r\n\
Proxy-Connection: keep-alive\r\nProxy-Authorization: Basic dTpw\r\nAccept: */*\r\n\r\n",
            None,
        )
        .await;
        let request = result.unwrap();
        assert_eq!(request.target, Address::parse("example.com:8000").unwrap());
        assert_eq!(request.protocol, ClientProtocol::HttpForward);
        let forwarded = std::str::from_utf8(&request.forward).unwrap();
        assert!(forwarded.starts_with("GET /a/b?c=d HTTP/1.1\r\n"));
        assert!(forwarded.contains("Host: example.com:8000\r\n"));
        assert!(forwarded.contains("Accept: */*\r\n"));
        assert!(!forwarded.contains("Proxy-"));
        assert!(forwarded.ends_with("Connection: close\r\n\r\n"));
    }

    #[tokio::test]
    async fn absolute_form_defaults_port_and_path() {
        let (result, _) = run(b"GET http://example.com HTTP/1.1\r\n\r\n", None).await;
        let request = result.unwrap();
        assert_eq!(request.target, Address::parse("example.com:80").unwrap());
        assert!(request.forward.starts_with(b"GET / HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn missing_credentials_get_407() {
        let cred = LocalAuthCredential::new("u", "p");
        let (result, response) =
            run(b"CONNECT example.com:443 HTTP/1.1\r\n\r\n", Some(cred)).await;
        assert!(matches!(result, Err(EngineError::AuthFailed)));
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 407 "));
        assert!(response.contains("Proxy-Authenticate: Basic realm=\"proxychain\""));
    }

    #[tokio::test]
    async fn basic_credentials_are_checked() {
        let cred = LocalAuthCredential::new("u", "p");
        // dTpw = "u:p"
        let (result, _) = run(
            b"CONNECT example.com:443 HTTP/1.1\r\nproxy-authorization: basic dTpw\r\n\r\n",
            Some(cred.clone()),
        )
        .await;
        assert!(result.is_ok());

        // dTp4 = "u:x"
        let (result, _) = run(
            b"CONNECT example.com:443 HTTP/1.1\r\nProxy-Authorization: Basic dTp4\r\n\r\n",
            Some(cred),
        )
        .await;
        assert!(matches!(result, Err(EngineError::AuthFailed)));
    }

    #[tokio::test]
    async fn origin_form_gets_400() {
        let (result, response) = run(b"GET /index.html HTTP/1.1\r\n\r\n", None).await;
        assert!(matches!(result, Err(EngineError::Protocol(_))));
        assert!(response.starts_with(b"HTTP/1.1 400 "));
    }

    #[test]
    fn query_without_path_gets_root() {
        let (target, path) = split_absolute_form("http://example.com?q=1").unwrap();
        assert_eq!(target.unwrap(), Address::parse("example.com:80").unwrap());
        assert_eq!(path, "/?q=1");
        assert!(split_absolute_form("ftp://example.com/").is_none());
        assert!(split_absolute_form("/relative").is_none());
    }

    #[test]
    fn head_end_includes_blank_line() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some(18));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n"), None);
    }
}
