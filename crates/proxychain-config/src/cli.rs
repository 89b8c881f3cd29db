//! Command-line overrides for the config file.

use clap::Args;

use crate::types::FileConfig;

/// CLI flags that take precedence over the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct CliOverrides {
    /// Override listen host, e.g. 127.0.0.1
    #[arg(long)]
    pub listen: Option<String>,
    /// Override listen port (0 picks an ephemeral port)
    #[arg(long)]
    pub port: Option<u16>,
    /// Require this username from local clients
    #[arg(long, requires = "pass")]
    pub user: Option<String>,
    /// Require this password from local clients
    #[arg(long, requires = "user")]
    pub pass: Option<String>,
    /// Override concurrent client connection ceiling
    #[arg(long)]
    pub max_connections: Option<usize>,
    /// Override log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Apply CLI overrides on top of a loaded config file.
pub fn apply_overrides(config: &mut FileConfig, overrides: &CliOverrides) {
    if let Some(v) = &overrides.listen {
        config.listener.host = v.clone();
    }
    if let Some(v) = overrides.port {
        config.listener.port = v;
    }
    if let Some(v) = &overrides.user {
        config.listener.username = Some(v.clone());
    }
    if let Some(v) = &overrides.pass {
        config.listener.password = Some(v.clone());
    }
    if let Some(v) = overrides.max_connections {
        config.listener.max_connections = v;
    }
    if let Some(v) = &overrides.log_level {
        config.logging.level = Some(v.clone());
    }
}
