//! Tally CLI
//!
//! Command-line interface for Tally - offline-first data layer for the
//! admin panel: inspect the local cache and queue, run sync passes.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tally_core::Config;

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Tally - Offline-first data layer for the admin panel")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show status (configuration, queue depth, last-sync times)
    Status,
    /// Run one sync pass against the remote backend
    Sync,
    /// List queued mutations waiting to be replayed
    Queue,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config = Config::load()?;

    match cli.command {
        Commands::Status => commands::status::show(&config, &output),
        Commands::Sync => commands::sync::run(&config, &output).await,
        Commands::Queue => commands::queue::list(&config, &output),
    }
}
