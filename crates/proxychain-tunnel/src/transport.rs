//! Raw transport connections and the tunnel stream type.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use proxychain_core::{Address, defaults};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::HopFailure;

/// Marker trait for streams a tunnel can be layered over.
pub trait TransportStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> TransportStream for T {}

/// TCP socket options applied to every outbound connection.
#[derive(Debug, Clone, Copy)]
pub struct TcpOptions {
    pub no_delay: bool,
    /// Keepalive idle time; zero disables keepalive.
    pub keepalive_secs: u64,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            no_delay: defaults::DEFAULT_TCP_NO_DELAY,
            keepalive_secs: defaults::DEFAULT_TCP_KEEPALIVE_SECS,
        }
    }
}

impl TcpOptions {
    fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.no_delay)?;

        if self.keepalive_secs > 0 {
            let sock = socket2::SockRef::from(stream);
            let keepalive =
                socket2::TcpKeepalive::new().with_time(Duration::from_secs(self.keepalive_secs));
            sock.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }
}

/// Resolve an address on this host.
pub(crate) async fn resolve(addr: &Address) -> Result<Vec<SocketAddr>, HopFailure> {
    if let Some(sa) = addr.socket_addr() {
        return Ok(vec![sa]);
    }
    let host = addr.host_str();
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), addr.port))
        .await
        .map_err(|_| HopFailure::Resolve(host.clone()))?
        .collect();
    if addrs.is_empty() {
        return Err(HopFailure::Resolve(host));
    }
    Ok(addrs)
}

/// Open a TCP connection, trying each resolved address in turn.
pub async fn connect_tcp(addr: &Address, options: &TcpOptions) -> Result<TcpStream, HopFailure> {
    let mut last_err = None;
    for sa in resolve(addr).await? {
        match TcpStream::connect(sa).await {
            Ok(stream) => {
                options.apply(&stream)?;
                debug!(target_addr = %addr, remote = %sa, "tcp connected");
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err
        .map(HopFailure::from)
        .unwrap_or_else(|| HopFailure::Resolve(addr.host_str())))
}

/// An established end-to-end tunnel.
///
/// `Tcp` is a bare socket: either a direct connection or a chain with no TLS
/// layer anywhere, where every hop only relays bytes after its handshake.
/// `Layered` wraps at least one TLS session. Dropping either variant closes
/// the socket to hop 0 and with it every nested hop connection.
pub enum TunnelStream {
    Tcp(TcpStream),
    Layered(Box<dyn TransportStream>),
}

impl TunnelStream {
    pub fn is_layered(&self) -> bool {
        matches!(self, TunnelStream::Layered(_))
    }

    /// The underlying socket, if the tunnel carries no TLS layer.
    pub fn into_tcp(self) -> Result<TcpStream, Self> {
        match self {
            TunnelStream::Tcp(s) => Ok(s),
            other => Err(other),
        }
    }
}

impl std::fmt::Debug for TunnelStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TunnelStream::Tcp(s) => f.debug_tuple("Tcp").field(s).finish(),
            TunnelStream::Layered(_) => f.write_str("Layered(..)"),
        }
    }
}

impl AsyncRead for TunnelStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TunnelStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            TunnelStream::Layered(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TunnelStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            TunnelStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            TunnelStream::Layered(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TunnelStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            TunnelStream::Layered(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TunnelStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            TunnelStream::Layered(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn connects_and_relays_over_tcp_variant() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = Address::from(listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            s.read_exact(&mut buf).await.unwrap();
            s.write_all(&buf).await.unwrap();
        });

        let tcp = connect_tcp(&addr, &TcpOptions::default()).await.unwrap();
        let mut stream = TunnelStream::Tcp(tcp);
        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        assert!(stream.into_tcp().is_ok());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn layered_variant_is_not_a_bare_socket() {
        let (a, _b) = tokio::io::duplex(64);
        let stream = TunnelStream::Layered(Box::new(a));
        assert!(stream.is_layered());
        assert!(stream.into_tcp().is_err());
    }

    #[tokio::test]
    async fn refused_connect_is_classified() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = Address::from(listener.local_addr().unwrap());
        drop(listener);
        let err = connect_tcp(&addr, &TcpOptions::default()).await.unwrap_err();
        assert!(matches!(err, HopFailure::Refused), "got {err:?}");
    }
}
