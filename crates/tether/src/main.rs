//! Tether - distributed session store node
//!
//! Main entry point for the tether CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;

mod commands;
mod listener;

use commands::{config, inspect, remove, serve, sweep};
use tether_config::LoggingSection;

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Tether - distributed session store node
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file to use instead of discovery
    #[arg(long, global = true, env = "TETHER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a session store node with its background sweeps
    Serve(serve::ServeArgs),

    /// Run one invalidation sweep against the database
    Sweep(sweep::SweepArgs),

    /// Show the stored copy of a session
    Inspect(inspect::InspectArgs),

    /// Delete a stored session
    Remove(remove::RemoveArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Console (human-readable, stderr) plus an optional rotating JSON file.
fn init_tracing(verbose: bool, logging: Option<&LoggingSection>) -> Option<WorkerGuard> {
    use tracing_subscriber::prelude::*;

    let filter = match logging.and_then(|l| l.filter.as_deref()) {
        Some(filter) if !verbose => filter.to_string(),
        _ if verbose => {
            "tether=debug,tether_session=debug,tether_sqlite=debug,tether_config=debug,info"
                .to_string()
        }
        _ => "tether=info,tether_session=info,tether_sqlite=info,warn".to_string(),
    };

    let (file_layer, guard) = match logging.and_then(|l| l.directory.as_ref()) {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "tether.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "tether=trace,tether_session=trace,tether_sqlite=trace,tether_config=trace,info",
                ));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(file_layer)
        .init();

    guard
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (settings, warnings) = match &cli.config {
        Some(path) => (tether_config::load_config_file(path)?, Vec::new()),
        None => {
            let loaded = tether_config::load_config(None)?;
            let warnings = loaded.warnings();
            (loaded.config, warnings)
        }
    };

    let _guard = init_tracing(cli.verbose, settings.logging.as_ref());
    for warning in &warnings {
        warn!("{warning}");
    }

    let ctx = commands::Context {
        json_output: cli.json,
        verbose: cli.verbose,
        config: settings,
    };

    match cli.command {
        Commands::Serve(args) => serve::run(args, &ctx).await,
        Commands::Sweep(args) => sweep::run(args, &ctx).await,
        Commands::Inspect(args) => inspect::run(args, &ctx).await,
        Commands::Remove(args) => remove::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
