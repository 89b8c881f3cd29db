//! Sequential hop walk with timeouts and whole-build retry.

use std::future::Future;
use std::time::Duration;

use proxychain_config::{ChainConfig, DnsMode};
use proxychain_core::Address;
use tracing::{debug, trace};

use crate::error::{HopFailure, TunnelError};
use crate::hop;
use crate::tls::TlsConnectors;
use crate::transport::{TcpOptions, TunnelStream, connect_tcp, resolve};

/// Handshake state of one hop within a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HopState {
    Pending,
    Connecting,
    Handshaking,
    Established,
    Failed,
}

/// Per-build hop bookkeeping.
#[derive(Debug)]
struct TunnelSession {
    states: Vec<HopState>,
    current: Option<usize>,
}

impl TunnelSession {
    fn new(hops: usize) -> Self {
        Self {
            states: vec![HopState::Pending; hops],
            current: None,
        }
    }

    fn enter(&mut self, index: usize, state: HopState) {
        self.current = Some(index);
        self.states[index] = state;
        trace!(hop = index, state = ?state, "hop state");
    }

    fn fail(&mut self, index: usize, cause: HopFailure) -> TunnelError {
        self.states[index] = HopState::Failed;
        debug!(hop = index, error = %cause, "hop failed");
        TunnelError::at_hop(index, cause)
    }

    fn established(&self) -> usize {
        self.states
            .iter()
            .filter(|s| **s == HopState::Established)
            .count()
    }
}

/// Builds tunnels through proxy chains.
///
/// Cheap to clone; holds the shared TLS configurations and socket options.
#[derive(Debug, Clone, Default)]
pub struct TunnelBuilder {
    tls: TlsConnectors,
    tcp: TcpOptions,
}

impl TunnelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tls(mut self, tls: TlsConnectors) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_tcp_options(mut self, tcp: TcpOptions) -> Self {
        self.tcp = tcp;
        self
    }

    /// Build a tunnel to `target` through every hop of `config`, in order.
    ///
    /// Retryable failures re-run the whole build from hop 0 up to
    /// `config.retry.attempts` times.
    pub async fn build(
        &self,
        config: &ChainConfig,
        target: &Address,
    ) -> Result<TunnelStream, TunnelError> {
        let attempts = config.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.build_once(config, target).await {
                Ok(stream) => return Ok(stream),
                Err(err) if attempt < attempts && err.is_retryable() => {
                    debug!(attempt, error = %err, "tunnel build failed, retrying");
                    tokio::time::sleep(config.retry.backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn build_once(
        &self,
        config: &ChainConfig,
        target: &Address,
    ) -> Result<TunnelStream, TunnelError> {
        let mut session = TunnelSession::new(config.hops.len());
        let result = tokio::time::timeout(
            config.connect_timeout,
            self.walk(config, target, &mut session),
        )
        .await;
        match result {
            Ok(result) => result,
            Err(_) => Err(match session.current {
                Some(i) => session.fail(i, HopFailure::Timeout),
                None => TunnelError::at_destination(HopFailure::Timeout),
            }),
        }
    }

    async fn walk(
        &self,
        config: &ChainConfig,
        target: &Address,
        session: &mut TunnelSession,
    ) -> Result<TunnelStream, TunnelError> {
        let Some(first) = config.hops.first() else {
            let tcp = connect_tcp(target, &self.tcp)
                .await
                .map_err(TunnelError::at_destination)?;
            debug!(target_addr = %target, "direct connection established");
            return Ok(TunnelStream::Tcp(tcp));
        };

        let target = match config.dns {
            DnsMode::Remote => target.clone(),
            DnsMode::Local => resolve_locally(target).await?,
        };

        session.enter(0, HopState::Connecting);
        let tcp = with_timeout(config.timeout_for(0), connect_tcp(&first.address(), &self.tcp))
            .await
            .map_err(|cause| session.fail(0, cause))?;
        let mut stream = TunnelStream::Tcp(tcp);

        for (i, hop) in config.hops.iter().enumerate() {
            let next = config
                .hops
                .get(i + 1)
                .map(|h| h.address())
                .unwrap_or_else(|| target.clone());
            session.enter(i, HopState::Handshaking);
            stream = with_timeout(
                config.timeout_for(i),
                hop::handshake(stream, hop, &next, &self.tls),
            )
            .await
            .map_err(|cause| session.fail(i, cause))?;
            session.enter(i, HopState::Established);
            debug!(hop = i, kind = %hop.kind, next = %next, "hop established");
        }

        debug!(
            hops = session.established(),
            target_addr = %target,
            layered = stream.is_layered(),
            "tunnel established"
        );
        Ok(stream)
    }
}

async fn resolve_locally(target: &Address) -> Result<Address, TunnelError> {
    if target.socket_addr().is_some() {
        return Ok(target.clone());
    }
    let addrs = resolve(target)
        .await
        .map_err(TunnelError::at_destination)?;
    // resolve never returns an empty list
    let first = addrs
        .first()
        .copied()
        .ok_or_else(|| TunnelError::at_destination(HopFailure::Resolve(target.host_str())))?;
    Ok(Address::from(first))
}

async fn with_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, HopFailure>>,
) -> Result<T, HopFailure> {
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(HopFailure::Timeout))
}
