//! Dial a destination through a chain without a listener.

use proxychain_core::Address;
use proxychain_tunnel::TunnelStream;
use tracing::debug;

use crate::engine::ProxyEngine;
use crate::error::EngineError;
use crate::store::ChainHandle;

impl ProxyEngine {
    /// Build a tunnel to `uri` through the entry's current config and hand
    /// it to the caller, who owns it from here on.
    pub async fn create_socket(
        &self,
        handle: ChainHandle,
        uri: &str,
    ) -> Result<TunnelStream, EngineError> {
        let entry = self.entry(handle)?;
        let target = Address::parse_uri(uri)?;
        let config = entry.snapshot();
        debug!(handle = %handle, target_addr = %target, hops = config.hops.len(), "dialing through chain");
        Ok(self.builder.build(&config, &target).await?)
    }
}

#[cfg(unix)]
pub(crate) use descriptor::into_raw_fd;

#[cfg(unix)]
mod descriptor {
    use std::io;
    use std::os::fd::{IntoRawFd, RawFd};
    use std::time::Duration;

    use proxychain_core::defaults::{DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_RELAY_BUFFER_SIZE};
    use proxychain_core::io::{NoopCounter, splice};
    use proxychain_tunnel::TunnelStream;
    use tracing::debug;

    /// Turn a tunnel into a blocking descriptor the caller owns.
    ///
    /// A plain TCP tunnel hands over its own socket. A layered (TLS) tunnel
    /// is bridged through a Unix socket pair whose far end is spliced to
    /// the tunnel on the current runtime.
    pub(crate) fn into_raw_fd(stream: TunnelStream) -> io::Result<RawFd> {
        match stream.into_tcp() {
            Ok(tcp) => {
                let std = tcp.into_std()?;
                std.set_nonblocking(false)?;
                Ok(std.into_raw_fd())
            }
            Err(layered) => {
                let (near, far) = std::os::unix::net::UnixStream::pair()?;
                far.set_nonblocking(true)?;
                let far = tokio::net::UnixStream::from_std(far)?;
                tokio::spawn(async move {
                    let result = splice(
                        far,
                        layered,
                        Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
                        DEFAULT_RELAY_BUFFER_SIZE,
                        &NoopCounter,
                    )
                    .await;
                    debug!(?result, "descriptor bridge closed");
                });
                Ok(near.into_raw_fd())
            }
        }
    }
}
