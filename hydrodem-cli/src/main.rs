//! HydroDEM CLI - Command-line interface
//!
//! This binary provides a command-line interface to the HydroDEM library.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{acquire, mosaic, tile};
use crate::error::CliError;

#[derive(Parser)]
#[command(name = "hydrodem")]
#[command(about = "Acquire elevation tiles and build DEM mosaics", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose (debug-level) logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Partition watershed regions into acquisition tiles
    Tile(tile::TileArgs),
    /// Acquire elevation tiles and assemble the mosaic
    Acquire(acquire::AcquireArgs),
    /// Rebuild the mosaic manifest from existing tile outputs
    Mosaic(mosaic::MosaicArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        CliError::LoggingInit(e).exit();
    }

    let result = match cli.command {
        Commands::Tile(args) => tile::run(args),
        Commands::Acquire(args) => acquire::run(args).await,
        Commands::Mosaic(args) => mosaic::run(args),
    };

    if let Err(e) = result {
        e.exit();
    }
}

fn init_logging(verbose: bool) -> Result<(), String> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| e.to_string())
}
