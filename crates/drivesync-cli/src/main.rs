//! DriveSync CLI - Command-line interface for DriveSync
//!
//! Provides commands for:
//! - Running sync cycles for configured roots
//! - Viewing per-root sync state
//! - Creating and validating the configuration
//! - Resetting a root's state

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    config::ConfigCommand, reset::ResetCommand, status::StatusCommand, sync::SyncCommand,
    CommandContext,
};
use drivesync_core::config::{Config, LoggingConfig};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "drivesync",
    version,
    about = "Bidirectional sync between local folders and a remote store"
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Synchronize the configured roots
    Sync(SyncCommand),
    /// Show synchronization state per root
    Status(StatusCommand),
    /// View, validate and create the configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Discard the sync state of a root
    Reset(ResetCommand),
}

/// `RUST_LOG` wins, then `-v`/`-q`, then `logging.level` from the config
fn log_filter(verbose: u8, quiet: bool, logging: &LoggingConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = match (verbose, quiet) {
        (0, true) => "error",
        (0, false) => logging.level.as_str(),
        (1, _) => "debug",
        _ => "trace",
    };
    EnvFilter::new(level)
}

fn init_tracing(cli: &Cli, logging: &LoggingConfig) {
    let filter = log_filter(cli.verbose, cli.quiet, logging);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let logging = Config::load_or_default(&config_path).logging;
    init_tracing(&cli, &logging);

    let ctx = CommandContext {
        format: if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        },
        quiet: cli.quiet,
        config_path,
    };

    match &cli.command {
        Commands::Sync(cmd) => cmd.execute(&ctx).await,
        Commands::Status(cmd) => cmd.execute(&ctx).await,
        Commands::Config(cmd) => cmd.execute(&ctx).await,
        Commands::Reset(cmd) => cmd.execute(&ctx).await,
    }
}
