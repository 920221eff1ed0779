//! Pipeline configuration.
//!
//! All tunables are carried in explicit configuration structs passed into
//! component constructors. Nothing in the core reads process environment or
//! global state.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default no-data value for elevation rasters.
pub const DEFAULT_NODATA: f32 = -999_999.0;

/// Default number of dynamic-source attempts before falling back.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default delay between dynamic-source retries.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 10;

/// Default number of times the scheduler resubmits a faulted job.
pub const DEFAULT_SCHEDULER_RETRIES: u32 = 2;

/// Default maximum pixel count accepted by the dynamic raster service
/// per request. Bounds the tile size (see [`PipelineConfig::max_tile_size`]).
pub const DEFAULT_SERVICE_MAX_PIXELS: u64 = 8_000_000;

/// Default one-sided tile overlap, in pixels.
pub const DEFAULT_PIXEL_BUFFER: u32 = 2;

/// Default resolution of the static fallback source, in CRS units.
pub const DEFAULT_FALLBACK_RESOLUTION: f64 = 10.0;

/// Coordinate reference system identifier, e.g. `"EPSG:5070"`.
///
/// The pipeline treats the CRS as an opaque label: tiles are requested from
/// the services in the target CRS, so no coordinate transformation happens
/// inside the core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crs(pub String);

impl Crs {
    /// Creates a CRS from an EPSG code.
    pub fn epsg(code: u32) -> Self {
        Self(format!("EPSG:{}", code))
    }

    /// Returns the numeric EPSG code, if this CRS is EPSG-encoded.
    pub fn epsg_code(&self) -> Option<u32> {
        self.0.strip_prefix("EPSG:").and_then(|c| c.parse().ok())
    }

    /// Returns the CRS identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Top-level configuration for an acquisition pipeline run.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Target DEM resolution, in horizontal CRS units (typically meters).
    pub resolution: f64,

    /// Target coordinate reference system.
    pub crs: Crs,

    /// No-data value written to all tile outputs and the mosaic.
    pub nodata: f32,

    /// Dynamic-source attempts per tile before the static fallback.
    pub max_retries: u32,

    /// Delay between dynamic-source retries.
    pub retry_delay: Duration,

    /// Scheduler-level resubmissions for a faulted worker task.
    pub scheduler_retries: u32,

    /// Worker pool size.
    pub workers: usize,

    /// Directory receiving tile outputs, the ledger, and the mosaic.
    pub output_dir: PathBuf,

    /// Replace an existing output directory instead of refusing to run.
    pub overwrite: bool,

    /// Resume a previous run, skipping tiles recorded in the ledger.
    pub resume: bool,

    /// Maximum pixels per dynamic service request.
    pub service_max_pixels: u64,

    /// One-sided tile overlap in pixels.
    pub pixel_buffer: u32,

    /// Fixed resolution of the static fallback source, in CRS units.
    pub fallback_resolution: f64,

    /// Optional coarse basemap referenced last in the mosaic to fill gaps.
    pub fallback_basemap: Option<PathBuf>,
}

impl PipelineConfig {
    /// Creates a configuration with defaults for everything except the
    /// required resolution, CRS, and output directory.
    pub fn new(resolution: f64, crs: Crs, output_dir: PathBuf) -> Self {
        Self {
            resolution,
            crs,
            nodata: DEFAULT_NODATA,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            scheduler_retries: DEFAULT_SCHEDULER_RETRIES,
            workers: default_workers(),
            output_dir,
            overwrite: false,
            resume: false,
            service_max_pixels: DEFAULT_SERVICE_MAX_PIXELS,
            pixel_buffer: DEFAULT_PIXEL_BUFFER,
            fallback_resolution: DEFAULT_FALLBACK_RESOLUTION,
            fallback_basemap: None,
        }
    }

    /// Set the worker pool size.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the dynamic-source retry cap.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay between dynamic-source retries.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the overwrite flag.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Set the resume flag.
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Set the coarse fallback basemap for the mosaic.
    pub fn with_fallback_basemap(mut self, path: PathBuf) -> Self {
        self.fallback_basemap = Some(path);
        self
    }

    /// One-sided tile overlap in CRS units: `pixel_buffer × resolution`.
    pub fn edge_buffer(&self) -> f64 {
        f64::from(self.pixel_buffer) * self.resolution
    }

    /// Maximum tile edge length in CRS units, derived from the dynamic
    /// service's pixel limit:
    /// `floor(sqrt(max_pixels)) × resolution − 2 × edge_buffer`.
    pub fn max_tile_size(&self) -> f64 {
        (self.service_max_pixels as f64).sqrt().floor() * self.resolution
            - 2.0 * self.edge_buffer()
    }

    /// Directory receiving the per-tile GeoTIFF outputs.
    pub fn tile_dir(&self) -> PathBuf {
        self.output_dir.join("tiles")
    }

    /// Path of the completion ledger file.
    pub fn ledger_path(&self) -> PathBuf {
        self.output_dir.join("completed_tiles.lst")
    }

    /// Path of the mosaic manifest, named after the target resolution.
    pub fn mosaic_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("dem_mosaic_{}m.vrt", self.resolution))
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1))
        .unwrap_or(1)
}
