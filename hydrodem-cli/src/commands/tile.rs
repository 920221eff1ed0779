//! `hydrodem tile` - partition regions into acquisition tiles.

use std::path::PathBuf;

use clap::Args;
use hydrodem::{plan_tiles, save_tiles, RegionSource};

use crate::commands::common::GridArgs;
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct TileArgs {
    /// GeoJSON file of watershed region polygons
    #[arg(long)]
    pub regions: PathBuf,

    /// Output GeoJSON file receiving the generated tiles
    #[arg(long)]
    pub output: PathBuf,

    #[command(flatten)]
    pub grid: GridArgs,
}

pub fn run(args: TileArgs) -> Result<(), CliError> {
    let workdir = args
        .output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let config = args.grid.to_config(workdir);

    let tiles = plan_tiles(&config, RegionSource::Path(args.regions))?;
    save_tiles(&args.output, &tiles)?;

    println!("Generated {} tiles", tiles.len());
    println!("  max tile size: {:.1} CRS units", config.max_tile_size());
    println!("  edge buffer:   {:.1} CRS units", config.edge_buffer());
    println!("  written to:    {}", args.output.display());
    Ok(())
}
