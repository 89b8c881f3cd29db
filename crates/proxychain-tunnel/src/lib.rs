//! Tunnel construction through a chain of upstream proxies.
//!
//! [`TunnelBuilder::build`] walks a [`ChainConfig`](proxychain_config::ChainConfig)
//! hop by hop: a TCP connection is opened to hop 0, then each hop is asked,
//! over the connection built so far, to extend the tunnel to the next hop or,
//! for the last hop, to the destination. `https` hops get a TLS session with
//! the proxy before their CONNECT request.

mod builder;
mod error;
mod hop;
mod tls;
mod transport;

pub use builder::TunnelBuilder;
pub use error::{HopFailure, TunnelError};
pub use tls::TlsConnectors;
pub use transport::{TcpOptions, TransportStream, TunnelStream, connect_tcp};
