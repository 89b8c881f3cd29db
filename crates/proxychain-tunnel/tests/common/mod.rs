//! In-process mock hops and echo servers.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proxychain_config::{Credentials, HopDescriptor, HopKind};
use proxychain_core::{Address, Host, socks5};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, PKCS_ECDSA_P256_SHA256, SanType,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

#[derive(Debug, Clone)]
pub enum MockKind {
    Socks5 { auth: Option<Credentials> },
    HttpConnect { auth: Option<Credentials> },
    /// HTTP CONNECT inside TLS with a self-signed certificate.
    HttpsConnect,
    /// Accepts, then never answers.
    Blackhole,
    /// Reads the first bytes of a handshake, then closes.
    CloseMidHandshake,
    /// Drops the first `n` connections immediately, then behaves as SOCKS5.
    FlakySocks5 { drop_first: usize },
}

#[derive(Debug, Default)]
pub struct MockStats {
    pub accepted: AtomicUsize,
    pub handshakes: AtomicUsize,
    /// Connections whose relay or handshake task has finished.
    pub closed: AtomicUsize,
    pub requests: Mutex<Vec<Address>>,
}

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
        let acceptor = matches!(kind, MockKind::HttpsConnect).then(self_signed_acceptor);
        Self::spawn_with(kind, acceptor).await
    }

    /// HTTPS CONNECT hop presenting the certificate chain behind `acceptor`.
    pub async fn spawn_tls(acceptor: TlsAcceptor) -> Self {
        Self::spawn_with(MockKind::HttpsConnect, Some(acceptor)).await
    }

    async fn spawn_with(kind: MockKind, acceptor: Option<TlsAcceptor>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(MockStats::default());
        let task_stats = stats.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let n = task_stats.accepted.fetch_add(1, Ordering::SeqCst);
                let stats = task_stats.clone();
                let kind = kind.clone();
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, kind, acceptor, n, &stats).await;
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

async fn serve(
    mut stream: TcpStream,
    kind: MockKind,
    acceptor: Option<TlsAcceptor>,
    index: usize,
    stats: &MockStats,
) -> std::io::Result<()> {
    match kind {
        MockKind::Socks5 { auth } => serve_socks5(stream, auth, stats).await,
        MockKind::HttpConnect { auth } => serve_http(stream, auth, stats).await,
        MockKind::HttpsConnect => {
            let Some(acceptor) = acceptor else {
                return Ok(());
            };
            let tls = acceptor.accept(stream).await?;
            serve_http(tls, None, stats).await
        }
        MockKind::Blackhole => {
            let mut buf = [0u8; 1024];
            while stream.read(&mut buf).await? > 0 {}
            Ok(())
        }
        MockKind::CloseMidHandshake => {
            let mut buf = [0u8; 3];
            let _ = stream.read(&mut buf).await?;
            Ok(())
        }
        MockKind::FlakySocks5 { drop_first } => {
            if index < drop_first {
                return Ok(());
            }
            serve_socks5(stream, None, stats).await
        }
    }
}

async fn serve_socks5(
    mut client: TcpStream,
    auth: Option<Credentials>,
    stats: &MockStats,
) -> std::io::Result<()> {
    let _ver = client.read_u8().await?;
    let n = client.read_u8().await? as usize;
    let mut methods = vec![0u8; n];
    client.read_exact(&mut methods).await?;
    let want = if auth.is_some() {
        socks5::METHOD_USER_PASS
    } else {
        socks5::METHOD_NO_AUTH
    };
    if !methods.contains(&want) {
        client.write_all(&[5, socks5::METHOD_NO_ACCEPTABLE]).await?;
        return Ok(());
    }
    client.write_all(&[5, want]).await?;

    if let Some(expected) = auth {
        let _ver = client.read_u8().await?;
        let ulen = client.read_u8().await? as usize;
        let mut user = vec![0u8; ulen];
        client.read_exact(&mut user).await?;
        let plen = client.read_u8().await? as usize;
        let mut pass = vec![0u8; plen];
        client.read_exact(&mut pass).await?;
        if user != expected.username.as_bytes() || pass != expected.password.as_bytes() {
            client.write_all(&[1, 1]).await?;
            return Ok(());
        }
        client.write_all(&[1, 0]).await?;
    }

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

async fn serve_http<S: AsyncRead + AsyncWrite + Unpin>(
    mut client: S,
    auth: Option<Credentials>,
    stats: &MockStats,
) -> std::io::Result<()> {
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        head.push(client.read_u8().await?);
    }
    let head = String::from_utf8_lossy(&head).into_owned();
    let authority = head
        .lines()
        .next()
        .and_then(|l| l.strip_prefix("CONNECT "))
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or_default()
        .to_string();

    if let Some(creds) = auth {
        use base64::Engine;
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", creds.username, creds.password));
        if !head.contains(&format!("Proxy-Authorization: Basic {token}")) {
            client
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await?;
            return Ok(());
        }
    }

    let Ok(target) = Address::parse(&authority) else {
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

async fn dial(target: &Address) -> std::io::Result<TcpStream> {
    match target.socket_addr() {
        Some(sa) => TcpStream::connect(sa).await,
        None => TcpStream::connect((target.host_str(), target.port)).await,
    }
}

fn self_signed_acceptor() -> TlsAcceptor {
    let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
    let cert = CertificateParams::new(vec!["localhost".to_string()])
        .unwrap()
        .self_signed(&key_pair)
        .unwrap();
    let cert_der = CertificateDer::from(cert.der().to_vec());
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

/// A private CA and an acceptor whose leaf, valid for `127.0.0.1` and
/// `localhost`, it signed. Returns the CA certificate to trust.
pub fn ca_signed_acceptor() -> (TlsAcceptor, CertificateDer<'static>) {
    let ca_key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "proxychain test ca");
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let leaf_key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
    let mut leaf_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    leaf_params
        .subject_alt_names
        .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    let leaf = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

    let chain = vec![CertificateDer::from(leaf.der().to_vec())];
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der()));
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key_der)
        .unwrap();
    (
        TlsAcceptor::from(Arc::new(config)),
        CertificateDer::from(ca_cert.der().to_vec()),
    )
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

pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("proxychain=debug")
        .with_test_writer()
        .try_init();
}
