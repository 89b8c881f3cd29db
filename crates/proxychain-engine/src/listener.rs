//! Local proxy listener: accept loop, inbound handshake and splice.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use proxychain_config::ListenerConfig;
use proxychain_core::defaults;
use proxychain_core::io::{PrefixedStream, SpliceStats, splice};
use proxychain_tunnel::TunnelBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::auth::LocalAuthCredential;
use crate::error::EngineError;
use crate::inbound;
use crate::store::{ChainHandle, SharedChain};
use crate::util::{ConnectionTracker, create_listener};

/// Pause after a failed `accept` (e.g. EMFILE) before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Lifecycle of the listener owned by one chain entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// How a local listener binds and treats its clients.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    pub host: IpAddr,
    /// 0 picks an ephemeral port.
    pub port: u16,
    pub auth: Option<LocalAuthCredential>,
    pub max_connections: usize,
    pub handshake_timeout: Duration,
    pub idle_timeout: Duration,
    pub drain_timeout: Duration,
    pub relay_buffer_size: usize,
    pub backlog: u32,
}

impl ListenerOptions {
    /// Loopback listener on `port` with default limits and no auth.
    pub fn new(port: u16) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            auth: None,
            max_connections: defaults::DEFAULT_MAX_CONNECTIONS,
            handshake_timeout: Duration::from_secs(defaults::DEFAULT_INBOUND_HANDSHAKE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(defaults::DEFAULT_IDLE_TIMEOUT_SECS),
            drain_timeout: Duration::from_secs(defaults::DEFAULT_DRAIN_TIMEOUT_SECS),
            relay_buffer_size: defaults::DEFAULT_RELAY_BUFFER_SIZE,
            backlog: defaults::DEFAULT_CONNECTION_BACKLOG,
        }
    }

    pub fn with_auth(mut self, username: &str, password: &str) -> Self {
        self.auth = Some(LocalAuthCredential::new(username, password));
        self
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl TryFrom<&ListenerConfig> for ListenerOptions {
    type Error = EngineError;

    fn try_from(config: &ListenerConfig) -> Result<Self, Self::Error> {
        let host = config.host.parse::<IpAddr>().map_err(|_| {
            EngineError::InvalidArgument(format!("listen host must be an IP address: {}", config.host))
        })?;
        Ok(Self {
            host,
            port: config.port,
            auth: config.credentials().as_ref().map(LocalAuthCredential::from),
            max_connections: config.max_connections,
            handshake_timeout: Duration::from_secs(config.handshake_timeout_secs),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            drain_timeout: Duration::from_secs(config.drain_timeout_secs),
            relay_buffer_size: config.relay_buffer_size,
            backlog: defaults::DEFAULT_CONNECTION_BACKLOG,
        })
    }
}

struct RunningListener {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct SlotInner {
    running: Option<RunningListener>,
    /// Set once the owning entry is destroyed; no listener may start after.
    closed: bool,
}

/// Holds at most one running listener for a chain entry.
pub(crate) struct ListenerSlot {
    state: parking_lot::Mutex<ListenerState>,
    inner: tokio::sync::Mutex<SlotInner>,
}

impl ListenerSlot {
    pub fn new() -> Self {
        Self {
            state: parking_lot::Mutex::new(ListenerState::Stopped),
            inner: tokio::sync::Mutex::new(SlotInner::default()),
        }
    }

    pub fn state(&self) -> ListenerState {
        *self.state.lock()
    }

    fn set_state(&self, state: ListenerState) {
        *self.state.lock() = state;
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().await.running.as_ref().map(|r| r.local_addr)
    }

    /// Bind and spawn the accept loop. Fails without side effects when a
    /// listener is already running, the slot is closed or the bind fails.
    pub async fn start(
        &self,
        handle: ChainHandle,
        options: ListenerOptions,
        chain: SharedChain,
        builder: TunnelBuilder,
    ) -> Result<SocketAddr, EngineError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(EngineError::UnknownHandle(handle));
        }
        if inner.running.is_some() {
            return Err(EngineError::AlreadyRunning(handle));
        }
        self.set_state(ListenerState::Starting);

        let bind_addr = options.bind_addr();
        let bound = create_listener(bind_addr, options.backlog)
            .and_then(|listener| listener.local_addr().map(|addr| (listener, addr)));
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                self.set_state(ListenerState::Stopped);
                warn!(handle = %handle, address = %bind_addr, error = %source, "listener bind failed");
                return Err(EngineError::Bind {
                    addr: bind_addr.to_string(),
                    source,
                });
            }
        };

        let shutdown = CancellationToken::new();
        let context = Arc::new(ListenerContext {
            handle,
            chain,
            builder,
            options,
        });
        let task = tokio::spawn(
            accept_loop(listener, context, shutdown.clone())
                .instrument(info_span!("listener", handle = %handle, address = %local_addr)),
        );

        inner.running = Some(RunningListener {
            local_addr,
            shutdown,
            task,
        });
        self.set_state(ListenerState::Running);
        info!(handle = %handle, address = %local_addr, "local proxy listening");
        Ok(local_addr)
    }

    /// Stop accepting, cancel in-flight connections and wait for the
    /// bounded drain. Returns false when nothing was running.
    pub async fn stop(&self, handle: ChainHandle) -> bool {
        let mut inner = self.inner.lock().await;
        self.shutdown(&mut inner, handle).await
    }

    /// Stop any running listener and refuse every later `start`.
    pub async fn close(&self, handle: ChainHandle) -> bool {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        self.shutdown(&mut inner, handle).await
    }

    async fn shutdown(&self, inner: &mut SlotInner, handle: ChainHandle) -> bool {
        let Some(listener) = inner.running.take() else {
            return false;
        };
        self.set_state(ListenerState::Stopping);
        listener.shutdown.cancel();
        if let Err(e) = listener.task.await {
            warn!(handle = %handle, error = %e, "listener task ended abnormally");
        }
        self.set_state(ListenerState::Stopped);
        info!(handle = %handle, address = %listener.local_addr, "local proxy stopped");
        true
    }
}

struct ListenerContext {
    handle: ChainHandle,
    chain: SharedChain,
    builder: TunnelBuilder,
    options: ListenerOptions,
}

async fn accept_loop(
    listener: TcpListener,
    context: Arc<ListenerContext>,
    shutdown: CancellationToken,
) {
    let tracker = ConnectionTracker::new();
    let limit = Arc::new(Semaphore::new(context.options.max_connections));

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                debug!("stop requested, closing listener");
                break;
            }

            result = listener.accept() => {
                let (tcp, peer) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                let permit = match limit.clone().try_acquire_owned() {
                    Ok(p) => p,
                    Err(_) => {
                        debug!(peer = %peer, reason = "max_connections", "connection rejected");
                        context.chain.counters.record_rejected();
                        drop(tcp); // close immediately
                        continue;
                    }
                };

                context.chain.counters.record_accepted();
                let guard = tracker.track();
                let context = context.clone();
                let cancel = shutdown.child_token();
                let span = info_span!("conn", handle = %context.handle, peer = %peer);

                tokio::spawn(
                    async move {
                        let _guard = guard;
                        let _permit = permit;
                        let result = serve_connection(tcp, &context, &cancel).await;
                        context.chain.counters.record_closed();
                        match result {
                            Ok(stats) => debug!(
                                up = stats.upstream,
                                down = stats.downstream,
                                idle_timeout = stats.idle_timeout,
                                "connection closed"
                            ),
                            Err(EngineError::AuthFailed) => {
                                context.chain.counters.record_failed();
                                warn!("local client authentication failed");
                            }
                            Err(e) => {
                                context.chain.counters.record_failed();
                                debug!(error = %e, error_type = e.error_type(), "connection failed");
                            }
                        }
                    }
                    .instrument(span),
                );
            }
        }
    }

    drop(listener);

    let active = tracker.count();
    if active > 0 {
        debug!(active, "draining connections");
        if !tracker.wait_for_zero(context.options.drain_timeout).await {
            warn!(remaining = tracker.count(), "drain timeout, connections still active");
        }
    }
}

/// Inbound handshake, tunnel build and splice for one client.
async fn serve_connection(
    mut tcp: TcpStream,
    context: &ListenerContext,
    cancel: &CancellationToken,
) -> Result<SpliceStats, EngineError> {
    let options = &context.options;
    let request = tokio::select! {
        _ = cancel.cancelled() => return Err(stopped()),
        result = tokio::time::timeout(
            options.handshake_timeout,
            inbound::accept(&mut tcp, options.auth.as_ref()),
        ) => match result {
            Ok(request) => request?,
            Err(_) => return Err(EngineError::Protocol("inbound handshake timed out".into())),
        },
    };

    // Config in force for this connection; later updates do not touch it.
    let config = context.chain.config.load_full();
    debug!(
        target_addr = %request.target,
        protocol = request.protocol.name(),
        hops = config.hops.len(),
        "client request"
    );

    let built = tokio::select! {
        _ = cancel.cancelled() => return Err(stopped()),
        result = context.builder.build(&config, &request.target) => result,
    };
    let tunnel = match built {
        Ok(tunnel) => tunnel,
        Err(e) => {
            let _ = inbound::reply_failure(&mut tcp, &request, &e).await;
            return Err(e.into());
        }
    };
    inbound::reply_success(&mut tcp, &request).await?;

    let client = PrefixedStream::new(request.forward, tcp);
    tokio::select! {
        _ = cancel.cancelled() => Err(stopped()),
        result = splice(
            client,
            tunnel,
            options.idle_timeout,
            options.relay_buffer_size,
            &*context.chain.counters,
        ) => Ok(result?),
    }
}

fn stopped() -> EngineError {
    EngineError::Io(io::Error::new(io::ErrorKind::Interrupted, "listener stopped"))
}
