//! Mock upstream hops, origin servers and local-proxy clients.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use proxychain_config::{HopDescriptor, HopKind};
use proxychain_core::{Address, Host, socks5};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
pub enum MockKind {
    Socks5,
    HttpConnect,
    /// Reads the first bytes of a handshake, then closes.
    CloseMidHandshake,
}

#[derive(Debug, Default)]
pub struct MockStats {
    pub accepted: AtomicUsize,
    pub handshakes: AtomicUsize,
    pub closed: AtomicUsize,
    pub requests: Mutex<Vec<Address>>,
}

/// Upstream proxy on an ephemeral loopback port.
pub struct MockProxy {
    pub addr: SocketAddr,
    pub stats: Arc<MockStats>,
    task: JoinHandle<()>,
}

impl Drop for MockProxy {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockProxy {
    pub async fn spawn(kind: MockKind) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(MockStats::default());
        let task_stats = stats.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                task_stats.accepted.fetch_add(1, Ordering::SeqCst);
                let stats = task_stats.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, kind, &stats).await;
                    stats.closed.fetch_add(1, Ordering::SeqCst);
                });
            }
        });
        Self { addr, stats, task }
    }

    pub fn hop(&self, kind: HopKind) -> HopDescriptor {
        HopDescriptor::new(kind, Host::Ip(self.addr.ip()), self.addr.port())
    }

    pub fn handshakes(&self) -> usize {
        self.stats.handshakes.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.stats.closed.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Address> {
        self.stats.requests.lock().unwrap().clone()
    }
}

async fn serve(mut stream: TcpStream, kind: MockKind, stats: &MockStats) -> std::io::Result<()> {
    match kind {
        MockKind::Socks5 => serve_socks5(stream, stats).await,
        MockKind::HttpConnect => serve_http_connect(stream, stats).await,
        MockKind::CloseMidHandshake => {
            let mut buf = [0u8; 3];
            let _ = stream.read(&mut buf).await?;
            Ok(())
        }
    }
}

async fn serve_socks5(mut client: TcpStream, stats: &MockStats) -> std::io::Result<()> {
    let _ver = client.read_u8().await?;
    let n = client.read_u8().await? as usize;
    let mut methods = vec![0u8; n];
    client.read_exact(&mut methods).await?;
    client.write_all(&[5, socks5::METHOD_NO_AUTH]).await?;

    let mut head = [0u8; 4];
    client.read_exact(&mut head).await?;
    let Some(target) = socks5::read_address(&mut client, head[3]).await? else {
        return Ok(());
    };
    stats.handshakes.fetch_add(1, Ordering::SeqCst);
    stats.requests.lock().unwrap().push(target.clone());

    match dial(&target).await {
        Ok(mut upstream) => {
            client.write_all(&[5, 0, 0, 1, 0, 0, 0, 0, 0, 0]).await?;
            tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
        }
        Err(_) => {
            client
                .write_all(&[5, socks5::REPLY_CONNECTION_REFUSED, 0, 1, 0, 0, 0, 0, 0, 0])
                .await?;
        }
    }
    Ok(())
}

async fn serve_http_connect(mut client: TcpStream, stats: &MockStats) -> std::io::Result<()> {
    let head = read_head(&mut client).await?;
    let Some(target) = head
        .lines()
        .next()
        .and_then(|l| l.strip_prefix("CONNECT "))
        .and_then(|l| l.split_whitespace().next())
        .and_then(|a| Address::parse(a).ok())
    else {
        client.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await?;
        return Ok(());
    };
    stats.handshakes.fetch_add(1, Ordering::SeqCst);
    stats.requests.lock().unwrap().push(target.clone());

    match dial(&target).await {
        Ok(mut upstream) => {
            client
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await?;
            tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
        }
        Err(_) => {
            client.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await?;
        }
    }
    Ok(())
}

async fn read_head(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        head.push(stream.read_u8().await?);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

async fn dial(target: &Address) -> std::io::Result<TcpStream> {
    match target.socket_addr() {
        Some(sa) => TcpStream::connect(sa).await,
        None => TcpStream::connect((target.host_str(), target.port)).await,
    }
}

/// TCP echo server on an ephemeral loopback port.
pub struct EchoServer {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl EchoServer {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut r, mut w) = stream.split();
                    let _ = tokio::io::copy(&mut r, &mut w).await;
                });
            }
        });
        Self { addr, task }
    }

    pub fn address(&self) -> Address {
        Address::from(self.addr)
    }
}

/// HTTP origin that answers every request with its own request head.
pub struct OriginServer {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Drop for OriginServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl OriginServer {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(head) = read_head(&mut stream).await else {
                        return;
                    };
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        head.len(),
                        head
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                });
            }
        });
        Self { addr, task }
    }
}

/// Run a SOCKS5 CONNECT against the local proxy and return the reply code.
pub async fn socks5_connect(
    stream: &mut TcpStream,
    target: &Address,
    auth: Option<(&str, &str)>,
) -> std::io::Result<u8> {
    let method = if auth.is_some() {
        socks5::METHOD_USER_PASS
    } else {
        socks5::METHOD_NO_AUTH
    };
    stream.write_all(&[5, 1, method]).await?;
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[1] != method {
        return Ok(socks5::REPLY_CONNECTION_NOT_ALLOWED);
    }
    if let Some((user, pass)) = auth {
        let mut msg = vec![1, user.len() as u8];
        msg.extend_from_slice(user.as_bytes());
        msg.push(pass.len() as u8);
        msg.extend_from_slice(pass.as_bytes());
        stream.write_all(&msg).await?;
        let mut status = [0u8; 2];
        stream.read_exact(&mut status).await?;
        if status[1] != 0 {
            return Ok(socks5::REPLY_CONNECTION_NOT_ALLOWED);
        }
    }

    let mut request = BytesMut::from(&[5u8, socks5::CMD_CONNECT, 0][..]);
    target.write_socks5(&mut request).unwrap();
    stream.write_all(&request).await?;
    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await?;
    Ok(reply[1])
}

pub async fn assert_echo(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, payload);
}

/// Read until the peer closes or errors; true when it closed.
pub async fn closed_by_peer(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 64];
    matches!(
        tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf)).await,
        Ok(Ok(0)) | Ok(Err(_))
    )
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("proxychain=debug")
        .with_test_writer()
        .try_init();
}
