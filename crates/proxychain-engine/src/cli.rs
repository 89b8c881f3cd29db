//! CLI module for the proxychain binary.
//!
//! `run` serves a local proxy from a config file, `encode` turns a chain
//! file into a transport blob and `check` validates a blob.

use std::io;
use std::path::PathBuf;

use clap::Args;
use proxychain_config::{
    ChainConfig, CliOverrides, LoggingConfig, apply_overrides, load_file_config, parse_text,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::engine::ProxyEngine;
use crate::listener::ListenerOptions;

/// Arguments for `proxychain run`.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Config file path (toml/json/jsonc)
    #[arg(short, long, default_value = "proxychain.toml")]
    pub config: PathBuf,

    #[command(flatten)]
    pub overrides: CliOverrides,
}

/// Arguments for `proxychain encode`.
#[derive(Args, Debug, Clone)]
pub struct EncodeArgs {
    /// Chain file: JSON, TOML, or one hop URI per line
    pub file: PathBuf,
}

/// Arguments for `proxychain check`.
#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Base64 chain blob
    pub blob: String,
}

/// Serve the configured chain on a local port until SIGINT/SIGTERM.
pub async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_file_config(&args.config)?;
    apply_overrides(&mut config, &args.overrides);
    config.validate()?;

    init_tracing(&config.logging);

    let chain = config.chain_config()?;
    let options = ListenerOptions::try_from(&config.listener)?;

    let engine = ProxyEngine::new();
    let handle = engine.create_chain();
    engine.install_chain(handle, chain)?;
    let addr = engine.start_local_proxy(handle, options).await?;
    info!(
        address = %addr,
        auth = config.listener.credentials().is_some(),
        "proxychain ready"
    );

    shutdown_signal_handler().await;
    info!("shutdown signal received");
    engine.shutdown().await;
    Ok(())
}

/// Print the transport blob for a chain file.
pub fn encode(args: EncodeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(&args.file)?;
    let config = parse_text(&text)?;
    println!("{}", config.encode());
    Ok(())
}

/// Validate a blob and print the chain it describes.
pub fn check(args: CheckArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ChainConfig::parse(&args.blob)?;
    println!("{}", describe(&config));
    Ok(())
}

fn describe(config: &ChainConfig) -> String {
    let mut out = if config.is_direct() {
        "direct connection (no hops)".to_string()
    } else {
        format!("{} hop(s)", config.hops.len())
    };
    for (i, hop) in config.hops.iter().enumerate() {
        out.push_str(&format!(
            "\n  [{i}] {}://{}{}",
            hop.kind,
            hop.address(),
            if hop.credentials.is_some() { " (auth)" } else { "" }
        ));
    }
    out.push_str(&format!(
        "\nconnect_timeout={}s hop_timeout={}s dns={} retry={}x/{}ms",
        config.connect_timeout.as_secs(),
        config.hop_timeout.as_secs(),
        config.dns.as_str(),
        config.retry.attempts,
        config.retry.backoff.as_millis()
    ));
    out
}

/// Wait for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Initialize tracing subscriber with the given logging configuration.
///
/// - `level`: base level (trace, debug, info, warn, error)
/// - `format`: json, pretty or compact. Default: pretty
/// - `output`: stdout or stderr. Default: stderr
/// - `filters`: per-module level overrides
fn init_tracing(config: &LoggingConfig) {
    let base_level = config.level.as_deref().unwrap_or("info");
    let mut filter_str = base_level.to_string();

    for (module, level) in &config.filters {
        filter_str.push(',');
        filter_str.push_str(module);
        filter_str.push('=');
        filter_str.push_str(level);
    }

    let filter = EnvFilter::try_new(&filter_str).unwrap_or_else(|_| EnvFilter::new("info"));

    let format = config.format.as_deref().unwrap_or("pretty");
    let output = config.output.as_deref().unwrap_or("stderr");

    match (format, output) {
        ("json", "stdout") => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stdout))
                .init();
        }
        ("json", _) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stderr))
                .init();
        }
        ("compact", "stdout") => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_writer(io::stdout))
                .init();
        }
        ("compact", _) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_writer(io::stderr))
                .init();
        }
        (_, "stdout") => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stdout))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr))
                .init();
        }
    }
}
