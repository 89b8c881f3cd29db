//! proxychain CLI.
//!
//! - `proxychain run` - serve a chain on a local SOCKS5/HTTP port
//! - `proxychain encode` - print the transport blob of a chain file
//! - `proxychain check` - validate a transport blob

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use proxychain_engine::cli;

#[derive(Parser)]
#[command(
    name = "proxychain",
    version,
    about = "Tunnel local connections through chains of upstream proxies",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a local proxy for the configured chain.
    #[command(name = "run", alias = "serve")]
    Run(cli::RunArgs),

    /// Encode a chain file as a transport blob.
    Encode(cli::EncodeArgs),

    /// Validate a transport blob.
    Check(cli::CheckArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => cli::run(args).await,
        Commands::Encode(args) => cli::encode(args),
        Commands::Check(args) => cli::check(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
