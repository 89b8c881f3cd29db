mod common;

use std::time::{Duration, Instant};

use common::{EchoServer, MockKind, MockProxy, closed_port, eventually, init_tracing};
use proxychain_config::{ChainConfig, Credentials, DnsMode, HopDescriptor, HopKind};
use proxychain_core::{Address, Host};
use proxychain_tunnel::{HopFailure, TunnelBuilder, TunnelStream};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

async fn assert_echo(stream: &mut TunnelStream) {
    stream.write_all(b"through the chain").await.unwrap();
    let mut buf = [0u8; 17];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"through the chain");
}

#[tokio::test]
async fn zero_hop_chain_connects_directly() {
    init_tracing();
    let echo = EchoServer::spawn().await;

    let mut stream = TunnelBuilder::new()
        .build(&ChainConfig::direct(), &echo.address())
        .await
        .unwrap();
    assert!(!stream.is_layered());
    assert_echo(&mut stream).await;
}

#[tokio::test]
async fn mixed_chain_performs_one_handshake_per_hop() {
    init_tracing();
    let echo = EchoServer::spawn().await;
    let a = MockProxy::spawn(MockKind::Socks5 { auth: None }).await;
    let b = MockProxy::spawn(MockKind::HttpConnect { auth: None }).await;
    let c = MockProxy::spawn(MockKind::Socks5 { auth: None }).await;

    let config = ChainConfig::with_hops(vec![
        a.hop(HopKind::Socks5),
        b.hop(HopKind::Http),
        c.hop(HopKind::Socks5),
    ]);
    let mut stream = TunnelBuilder::new()
        .build(&config, &echo.address())
        .await
        .unwrap();
    assert_echo(&mut stream).await;

    assert_eq!((a.handshakes(), b.handshakes(), c.handshakes()), (1, 1, 1));
    // Each hop was asked for the next hop, the last for the destination.
    assert_eq!(a.requests(), vec![Address::from(b.addr)]);
    assert_eq!(b.requests(), vec![Address::from(c.addr)]);
    assert_eq!(c.requests(), vec![echo.address()]);
    // Only hop 0 saw a direct connection from us.
    assert_eq!(a.stats.accepted.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn hop_credentials_are_presented() {
    init_tracing();
    let echo = EchoServer::spawn().await;
    let creds = Credentials::new("alice", "s3cret");
    let a = MockProxy::spawn(MockKind::Socks5 {
        auth: Some(creds.clone()),
    })
    .await;
    let b = MockProxy::spawn(MockKind::HttpConnect {
        auth: Some(creds.clone()),
    })
    .await;

    let config = ChainConfig::with_hops(vec![
        a.hop(HopKind::Socks5).with_credentials(creds.clone()),
        b.hop(HopKind::Http).with_credentials(creds),
    ]);
    let mut stream = TunnelBuilder::new()
        .build(&config, &echo.address())
        .await
        .unwrap();
    assert_echo(&mut stream).await;
}

#[tokio::test]
async fn wrong_hop_credentials_fail_at_that_hop() {
    init_tracing();
    let echo = EchoServer::spawn().await;
    let a = MockProxy::spawn(MockKind::Socks5 { auth: None }).await;
    let b = MockProxy::spawn(MockKind::HttpConnect {
        auth: Some(Credentials::new("u", "right")),
    })
    .await;

    let config = ChainConfig::with_hops(vec![
        a.hop(HopKind::Socks5),
        b.hop(HopKind::Http)
            .with_credentials(Credentials::new("u", "wrong")),
    ]);
    let err = TunnelBuilder::new()
        .build(&config, &echo.address())
        .await
        .unwrap_err();
    assert_eq!(err.hop, Some(1));
    assert!(matches!(err.cause, HopFailure::AuthRejected), "got {err:?}");
}

#[tokio::test]
async fn failure_at_hop_k_closes_earlier_hops() {
    init_tracing();
    let echo = EchoServer::spawn().await;
    let a = MockProxy::spawn(MockKind::Socks5 { auth: None }).await;
    let b = MockProxy::spawn(MockKind::CloseMidHandshake).await;
    let c = MockProxy::spawn(MockKind::Socks5 { auth: None }).await;

    let config = ChainConfig::with_hops(vec![
        a.hop(HopKind::Socks5),
        b.hop(HopKind::Socks5),
        c.hop(HopKind::Socks5),
    ]);
    let err = TunnelBuilder::new()
        .build(&config, &echo.address())
        .await
        .unwrap_err();
    assert_eq!(err.hop, Some(1), "got {err}");
    assert_eq!(c.stats.accepted.load(std::sync::atomic::Ordering::SeqCst), 0);
    // Hop 0's relay towards hop 1 ends once our socket to hop 0 is gone.
    assert!(eventually(|| a.closed() == 1).await);
}

#[tokio::test]
async fn refused_first_hop_reports_index_zero() {
    let dead = closed_port().await;
    let config = ChainConfig::with_hops(vec![HopDescriptor::new(
        HopKind::Socks5,
        Host::Ip(dead.ip()),
        dead.port(),
    )]);
    let target = Address::parse("192.0.2.10:80").unwrap();
    let err = TunnelBuilder::new().build(&config, &target).await.unwrap_err();
    assert_eq!(err.hop, Some(0));
    assert!(matches!(err.cause, HopFailure::Refused), "got {err:?}");
}

#[tokio::test]
async fn unresponsive_hop_times_out() {
    let a = MockProxy::spawn(MockKind::Socks5 { auth: None }).await;
    let b = MockProxy::spawn(MockKind::Blackhole).await;
    let mut slow = b.hop(HopKind::Http);
    slow.timeout = Some(Duration::from_secs(1));
    let config = ChainConfig::with_hops(vec![a.hop(HopKind::Socks5), slow]);

    let started = Instant::now();
    let target = Address::parse("192.0.2.10:80").unwrap();
    let err = TunnelBuilder::new().build(&config, &target).await.unwrap_err();
    assert_eq!(err.hop, Some(1));
    assert!(matches!(err.cause, HopFailure::Timeout));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn overall_timeout_bounds_the_build() {
    let a = MockProxy::spawn(MockKind::Blackhole).await;
    let mut config = ChainConfig::with_hops(vec![a.hop(HopKind::Socks5)]);
    config.connect_timeout = Duration::from_secs(1);
    config.hop_timeout = Duration::from_secs(30);

    let target = Address::parse("192.0.2.10:80").unwrap();
    let err = TunnelBuilder::new().build(&config, &target).await.unwrap_err();
    assert_eq!(err.hop, Some(0));
    assert!(matches!(err.cause, HopFailure::Timeout));
}

#[tokio::test]
async fn retry_reruns_the_whole_build() {
    init_tracing();
    let echo = EchoServer::spawn().await;

    let flaky = MockProxy::spawn(MockKind::FlakySocks5 { drop_first: 1 }).await;
    let config = ChainConfig::with_hops(vec![flaky.hop(HopKind::Socks5)]);
    let err = TunnelBuilder::new()
        .build(&config, &echo.address())
        .await
        .unwrap_err();
    assert!(err.is_retryable(), "got {err:?}");

    let flaky = MockProxy::spawn(MockKind::FlakySocks5 { drop_first: 1 }).await;
    let mut config = ChainConfig::with_hops(vec![flaky.hop(HopKind::Socks5)]);
    config.retry.attempts = 2;
    config.retry.backoff = Duration::from_millis(10);
    let mut stream = TunnelBuilder::new()
        .build(&config, &echo.address())
        .await
        .unwrap();
    assert_echo(&mut stream).await;
    assert_eq!(
        flaky.stats.accepted.load(std::sync::atomic::Ordering::SeqCst),
        2
    );
}

#[tokio::test]
async fn rejections_are_not_retried() {
    let a = MockProxy::spawn(MockKind::Socks5 {
        auth: Some(Credentials::new("u", "p")),
    })
    .await;
    let mut config = ChainConfig::with_hops(vec![a.hop(HopKind::Socks5)]);
    config.retry.attempts = 3;
    let target = Address::parse("192.0.2.10:80").unwrap();
    let err = TunnelBuilder::new().build(&config, &target).await.unwrap_err();
    assert!(matches!(err.cause, HopFailure::AuthRejected));
    assert_eq!(a.stats.accepted.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dns_mode_decides_who_resolves_the_destination() {
    let a = MockProxy::spawn(MockKind::Socks5 { auth: None }).await;
    let target = Address::parse("localhost:9").unwrap();

    let config = ChainConfig::with_hops(vec![a.hop(HopKind::Socks5)]);
    let _ = TunnelBuilder::new().build(&config, &target).await;
    assert_eq!(a.requests()[0].host, Host::Domain("localhost".into()));

    let mut config = ChainConfig::with_hops(vec![a.hop(HopKind::Socks5)]);
    config.dns = DnsMode::Local;
    let _ = TunnelBuilder::new().build(&config, &target).await;
    match &a.requests()[1].host {
        Host::Ip(ip) => assert!(ip.is_loopback()),
        other => panic!("expected a resolved address, got {other:?}"),
    }
}
