//! Default value functions for serde deserialization.
//!
//! These functions forward to constants defined in `proxychain_core::defaults`.

use proxychain_core::defaults;

/// Generate default value functions that forward to proxychain_core::defaults constants.
macro_rules! default_fns {
    ($($fn_name:ident => $const_name:ident : $ty:ty),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> $ty {
                defaults::$const_name
            }
        )*
    };
}

default_fns! {
    default_max_connections         => DEFAULT_MAX_CONNECTIONS: usize,
    default_handshake_timeout_secs  => DEFAULT_INBOUND_HANDSHAKE_TIMEOUT_SECS: u64,
    default_idle_timeout_secs       => DEFAULT_IDLE_TIMEOUT_SECS: u64,
    default_drain_timeout_secs      => DEFAULT_DRAIN_TIMEOUT_SECS: u64,
    default_relay_buffer_size       => DEFAULT_RELAY_BUFFER_SIZE: usize,
    default_socks5_port             => DEFAULT_SOCKS5_PORT: u16,
}

pub(crate) fn default_listen_host() -> String {
    defaults::DEFAULT_LISTEN_HOST.to_string()
}
