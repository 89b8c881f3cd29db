//! Blocking facade for a foreign-function binding layer.
//!
//! Handles cross as `i64`, results as `i32` status codes (see
//! [`crate::error`]). Every call blocks on the facade's own runtime, so the
//! facade must not be used from inside another Tokio runtime.

use std::io;
use std::sync::Arc;

use tokio::runtime::Runtime;
use tracing::{debug, warn};

use crate::engine::ProxyEngine;
use crate::error::{EngineError, STATUS_OK};
use crate::listener::ListenerOptions;
use crate::store::ChainHandle;

pub struct ProxyChain {
    runtime: Runtime,
    engine: Arc<ProxyEngine>,
}

impl ProxyChain {
    pub fn new() -> io::Result<Self> {
        Self::with_engine(ProxyEngine::new())
    }

    pub fn with_engine(engine: ProxyEngine) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("proxychain-worker")
            .build()?;
        Ok(Self {
            runtime,
            engine: Arc::new(engine),
        })
    }

    pub fn engine(&self) -> &Arc<ProxyEngine> {
        &self.engine
    }

    /// New chain with the direct-connect config. Never 0.
    pub fn init(&self) -> i64 {
        self.engine.create_chain().as_raw()
    }

    pub fn destroy(&self, handle: i64) {
        match ChainHandle::from_raw(handle) {
            Some(handle) => {
                self.runtime.block_on(self.engine.destroy_chain(handle));
            }
            None => debug!(handle, "destroy with invalid handle ignored"),
        }
    }

    pub fn update(&self, handle: i64, config: Option<&str>) -> i32 {
        status(self.update_inner(handle, config))
    }

    fn update_inner(&self, handle: i64, config: Option<&str>) -> Result<(), EngineError> {
        let handle = parse_handle(handle)?;
        let config = non_empty(config, "config")?;
        self.engine.update_chain(handle, config)
    }

    pub fn start_local_proxy(&self, handle: i64, port: i32) -> i32 {
        status(self.start_inner(handle, port, None))
    }

    pub fn start_local_proxy_auth(
        &self,
        handle: i64,
        port: i32,
        username: Option<&str>,
        password: Option<&str>,
    ) -> i32 {
        status(self.start_inner(handle, port, Some((username, password))))
    }

    fn start_inner(
        &self,
        handle: i64,
        port: i32,
        auth: Option<(Option<&str>, Option<&str>)>,
    ) -> Result<(), EngineError> {
        let handle = parse_handle(handle)?;
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| EngineError::InvalidArgument(format!("port out of range: {port}")))?;
        let mut options = ListenerOptions::new(port);
        if let Some((username, password)) = auth {
            let username = non_empty(username, "username")?;
            let password = non_empty(password, "password")?;
            options = options.with_auth(username, password);
        }
        self.runtime
            .block_on(self.engine.start_local_proxy(handle, options))
            .map(|_| ())
    }

    pub fn stop_local_proxy(&self, handle: i64) {
        let Some(handle) = ChainHandle::from_raw(handle) else {
            debug!(handle, "stop with invalid handle ignored");
            return;
        };
        if let Err(e) = self.runtime.block_on(self.engine.stop_local_proxy(handle)) {
            debug!(error = %e, "stop ignored");
        }
    }

    /// Connected descriptor (>= 0) owned by the caller, or a negative
    /// status code.
    pub fn create_socket(&self, handle: i64, uri: Option<&str>) -> i64 {
        match self.create_socket_inner(handle, uri) {
            Ok(fd) => fd,
            Err(e) => {
                warn!(error = %e, error_type = e.error_type(), "create_socket failed");
                i64::from(e.status_code())
            }
        }
    }

    #[cfg(unix)]
    fn create_socket_inner(&self, handle: i64, uri: Option<&str>) -> Result<i64, EngineError> {
        let handle = parse_handle(handle)?;
        let uri = non_empty(uri, "uri")?;
        self.runtime.block_on(async {
            let stream = self.engine.create_socket(handle, uri).await?;
            Ok::<_, EngineError>(i64::from(crate::socket::into_raw_fd(stream)?))
        })
    }

    #[cfg(not(unix))]
    fn create_socket_inner(&self, handle: i64, uri: Option<&str>) -> Result<i64, EngineError> {
        self.engine.entry(parse_handle(handle)?)?;
        proxychain_core::Address::parse_uri(non_empty(uri, "uri")?)?;
        Err(EngineError::Io(io::Error::new(
            io::ErrorKind::Unsupported,
            "descriptor handoff requires a unix platform",
        )))
    }
}

/// Handles <= 0 are malformed; any other value is looked up as given.
fn parse_handle(raw: i64) -> Result<ChainHandle, EngineError> {
    ChainHandle::from_raw(raw)
        .ok_or_else(|| EngineError::InvalidArgument(format!("invalid handle {raw}")))
}

fn non_empty<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, EngineError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(EngineError::InvalidArgument(format!("{name} is missing"))),
    }
}

fn status(result: Result<(), EngineError>) -> i32 {
    match result {
        Ok(()) => STATUS_OK,
        Err(e) => {
            debug!(error = %e, error_type = e.error_type(), "boundary call failed");
            e.status_code()
        }
    }
}
