//! `hydrodem acquire` - run the full acquisition pipeline.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use hydrodem::config::{DEFAULT_FALLBACK_RESOLUTION, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_SECS};
use hydrodem::{
    load_tiles, AsyncReqwestClient, DynamicServiceSource, ElevationSource, FetchRequest,
    Pipeline, Raster, RegionSource, RunReport, SourceError, StaticBasemapSource,
};

use crate::commands::common::GridArgs;
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct AcquireArgs {
    /// GeoJSON file of watershed region polygons
    #[arg(long, conflicts_with = "tiles")]
    pub regions: Option<PathBuf>,

    /// Pre-generated tile file from `hydrodem tile`
    #[arg(long)]
    pub tiles: Option<PathBuf>,

    /// Directory receiving tiles, ledger, mosaic, and run report
    #[arg(long)]
    pub output_dir: PathBuf,

    /// Dynamic elevation image service root URL
    #[arg(long)]
    pub service_url: String,

    /// Coarse fallback image service root URL
    #[arg(long, conflicts_with = "fallback_basemap")]
    pub fallback_url: Option<String>,

    /// Local coarse fallback basemap GeoTIFF
    #[arg(long)]
    pub fallback_basemap: Option<PathBuf>,

    /// Resolution of the static fallback source, in CRS units
    #[arg(long, default_value_t = DEFAULT_FALLBACK_RESOLUTION)]
    pub fallback_resolution: f64,

    /// Dynamic source attempts per tile before falling back
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Seconds between dynamic source retries
    #[arg(long, default_value_t = DEFAULT_RETRY_DELAY_SECS)]
    pub retry_delay: u64,

    /// Worker pool size (defaults to available cores minus one)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Discard any previous run in the output directory
    #[arg(long)]
    pub overwrite: bool,

    /// Resume a previous run from its ledger
    #[arg(long, conflicts_with = "overwrite")]
    pub resume: bool,

    #[command(flatten)]
    pub grid: GridArgs,
}

/// Static fallback tier: either a second (coarser) image service or a
/// local basemap file.
enum FallbackSource {
    Service(DynamicServiceSource<AsyncReqwestClient>),
    Basemap(StaticBasemapSource),
}

impl ElevationSource for FallbackSource {
    fn name(&self) -> &str {
        match self {
            FallbackSource::Service(s) => s.name(),
            FallbackSource::Basemap(s) => s.name(),
        }
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Raster, SourceError> {
        match self {
            FallbackSource::Service(s) => s.fetch(request).await,
            FallbackSource::Basemap(s) => s.fetch(request).await,
        }
    }
}

pub async fn run(args: AcquireArgs) -> Result<(), CliError> {
    let mut config = args
        .grid
        .to_config(args.output_dir.clone())
        .with_max_retries(args.max_retries)
        .with_retry_delay(Duration::from_secs(args.retry_delay))
        .with_overwrite(args.overwrite)
        .with_resume(args.resume);
    config.fallback_resolution = args.fallback_resolution;
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if let Some(path) = &args.fallback_basemap {
        config = config.with_fallback_basemap(path.clone());
    }

    let client = AsyncReqwestClient::new().map_err(|e| CliError::Source(e.to_string()))?;
    let dynamic = DynamicServiceSource::new(client.clone(), &args.service_url, "dynamic");

    let fallback = match (&args.fallback_url, &args.fallback_basemap) {
        (Some(url), _) => Some(FallbackSource::Service(DynamicServiceSource::new(
            client, url, "static",
        ))),
        (None, Some(path)) => Some(FallbackSource::Basemap(
            StaticBasemapSource::open(path)
                .await
                .map_err(|e| CliError::Source(e.to_string()))?,
        )),
        (None, None) => None,
    };

    let pipeline = Pipeline::new(config, dynamic, fallback);
    let report = match (args.tiles, args.regions) {
        (Some(tiles_path), _) => {
            let tiles = load_tiles(&tiles_path)?;
            let regions: HashSet<&str> = tiles.iter().map(|t| t.region_id()).collect();
            let region_count = regions.len().max(1);
            pipeline.run_tiles(tiles, region_count).await?
        }
        (None, Some(regions_path)) => pipeline.run(RegionSource::Path(regions_path)).await?,
        (None, None) => {
            return Err(CliError::Args(
                "either --regions or --tiles is required".to_string(),
            ))
        }
    };

    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Run complete:");
    println!("  regions:   {}", report.regions);
    println!("  tiles:     {}", report.tiles_planned);
    println!("  succeeded: {}", report.succeeded);
    println!("  skipped:   {}", report.skipped);
    println!("  failed:    {}", report.failed.len());
    for tile_id in &report.failed {
        println!("    {}", tile_id);
    }
    println!("Mosaic: {}", report.mosaic.display());
}
