//! Lossy CLI - Command-line interface
//!
//! Runs the impairment shim against loopback sockets or as a UDP relay.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use lossy_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "lossy")]
#[command(about = "Simulate bandwidth limits, latency and packet loss on outbound UDP traffic")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level
    #[arg(long, global = true, default_value = "info")]
    log_level: CliLogLevel,

    /// Directory for the full trace log
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())?;

    if let Err(e) = commands::handle_command(cli.command).await {
        if e.is_user_error() {
            eprintln!("{}", e.user_message());
            std::process::exit(2);
        }
        return Err(e.into());
    }

    Ok(())
}
