//! Tile acquisition.
//!
//! [`AcquisitionStrategy`] turns one tile into one normalized GeoTIFF on
//! disk: fetch from the dynamic source with bounded retries, fall back to
//! the static source exactly once, then normalize the grid and no-data
//! encoding and write the output with a JSON provenance sidecar.

mod retry;

pub use retry::{retry_fetch, RetryPolicy};

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Crs, PipelineConfig};
use crate::raster::{write_geotiff, Bounds, Raster, RasterError};
use crate::source::{ElevationSource, FetchRequest, SourceError};
use crate::tiler::Tile;

/// Which source tier produced a tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Dynamic,
    Static,
}

/// Provenance record for one acquired tile.
///
/// Serialized as a JSON sidecar next to the raster file, and consumed by
/// the mosaic step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TileOutput {
    pub tile_id: String,
    pub region_id: String,
    pub path: PathBuf,
    pub crs: Crs,
    pub resolution: f64,
    pub nodata: f32,
    pub bounds: Bounds,
    pub source_used: SourceKind,
    pub acquired_at: DateTime<Utc>,
}

impl TileOutput {
    /// Path of the JSON provenance sidecar.
    pub fn sidecar_path(&self) -> PathBuf {
        self.path.with_extension("json")
    }
}

/// Result of acquiring one tile.
///
/// A source that definitively has no data for a tile's extent is a benign
/// skip, not a failure; the run continues and the tile simply contributes
/// nothing to the mosaic.
#[derive(Clone, Debug)]
pub enum AcquireOutcome {
    Output(TileOutput),
    Skipped { tile_id: String },
}

/// Errors raised while acquiring a tile.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("tile {tile_id}: dynamic source failed ({dynamic}); fallback failed ({fallback})")]
    AllSourcesFailed {
        tile_id: String,
        dynamic: String,
        fallback: String,
    },

    #[error("tile {tile_id}: dynamic source failed ({dynamic}) and no fallback is configured")]
    NoFallback { tile_id: String, dynamic: String },

    #[error("tile {tile_id} has no computable bounds")]
    DegenerateTile { tile_id: String },

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error("storage fault writing {path}: {message}")]
    Storage { path: PathBuf, message: String },
}

impl AcquireError {
    /// Storage faults poison every subsequent write, so the scheduler
    /// aborts the whole run instead of recording a per-tile failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AcquireError::Storage { .. })
    }
}

/// Two-tier acquisition strategy: dynamic service with bounded retries,
/// then a static fallback tried exactly once.
pub struct AcquisitionStrategy<D: ElevationSource, F: ElevationSource> {
    dynamic: D,
    fallback: Option<F>,
    policy: RetryPolicy,
    resolution: f64,
    fallback_resolution: f64,
    crs: Crs,
    nodata: f32,
    tile_dir: PathBuf,
}

impl<D: ElevationSource, F: ElevationSource> AcquisitionStrategy<D, F> {
    /// Creates a strategy from the pipeline configuration and sources.
    pub fn new(config: &PipelineConfig, dynamic: D, fallback: Option<F>) -> Self {
        Self {
            dynamic,
            fallback,
            policy: RetryPolicy::fixed(config.max_retries, config.retry_delay),
            resolution: config.resolution,
            fallback_resolution: config.fallback_resolution,
            crs: config.crs.clone(),
            nodata: config.nodata,
            tile_dir: config.tile_dir(),
        }
    }

    /// Deterministic output path for a tile: `{region_id}_{tile_id}.tif`
    /// under the tile directory.
    pub fn output_path(&self, tile: &Tile) -> PathBuf {
        self.tile_dir
            .join(format!("{}_{}.tif", tile.region_id(), tile.id()))
    }

    /// Acquires, normalizes, and writes one tile.
    pub async fn acquire(&self, tile: &Tile) -> Result<AcquireOutcome, AcquireError> {
        let tile_id = tile.id().to_string();
        let rect = tile.bounds().ok_or_else(|| AcquireError::DegenerateTile {
            tile_id: tile_id.clone(),
        })?;
        let bounds = Bounds::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y);

        let (raster, source_used) = match self.fetch_with_fallback(&tile_id, bounds).await? {
            Some(fetched) => fetched,
            None => {
                info!(tile_id = %tile_id, "no source covers this tile, skipping");
                return Ok(AcquireOutcome::Skipped { tile_id });
            }
        };

        let raster = match self.normalize(raster) {
            Ok(raster) => raster,
            Err(RasterError::AllNodata) => {
                warn!(tile_id = %tile_id, "tile is entirely no-data after normalization, skipping");
                return Ok(AcquireOutcome::Skipped { tile_id });
            }
            Err(e) => return Err(e.into()),
        };

        let output = TileOutput {
            tile_id: tile_id.clone(),
            region_id: tile.region_id().to_string(),
            path: self.output_path(tile),
            crs: self.crs.clone(),
            resolution: self.resolution,
            nodata: self.nodata,
            bounds: raster.bounds(),
            source_used,
            acquired_at: Utc::now(),
        };
        write_output(&output, raster).await?;

        info!(
            tile_id = %tile_id,
            region = %output.region_id,
            source = ?source_used,
            path = %output.path.display(),
            "tile acquired"
        );
        Ok(AcquireOutcome::Output(output))
    }

    /// Fetches from the dynamic tier with retries, then the static tier
    /// once. `Ok(None)` means every available tier reported an empty
    /// slice for this extent.
    async fn fetch_with_fallback(
        &self,
        tile_id: &str,
        bounds: Bounds,
    ) -> Result<Option<(Raster, SourceKind)>, AcquireError> {
        let request = FetchRequest {
            bounds,
            resolution: self.resolution,
            crs: self.crs.clone(),
            nodata: f64::from(self.nodata),
        };

        let dynamic_err = match retry_fetch(&self.policy, self.dynamic.name(), || {
            self.dynamic.fetch(&request)
        })
        .await
        {
            Ok(raster) => return Ok(Some((raster, SourceKind::Dynamic))),
            Err(SourceError::EmptySlice) => return Ok(None),
            Err(e) => e,
        };

        let fallback = match &self.fallback {
            Some(fallback) => fallback,
            None => {
                return Err(AcquireError::NoFallback {
                    tile_id: tile_id.to_string(),
                    dynamic: dynamic_err.to_string(),
                })
            }
        };

        warn!(
            tile_id = %tile_id,
            error = %dynamic_err,
            fallback = fallback.name(),
            "dynamic source exhausted, trying static fallback"
        );
        let fallback_request = FetchRequest {
            resolution: self.fallback_resolution,
            ..request
        };
        match fallback.fetch(&fallback_request).await {
            Ok(raster) => Ok(Some((raster, SourceKind::Static))),
            Err(SourceError::EmptySlice) => Ok(None),
            Err(fallback_err) => Err(AcquireError::AllSourcesFailed {
                tile_id: tile_id.to_string(),
                dynamic: dynamic_err.to_string(),
                fallback: fallback_err.to_string(),
            }),
        }
    }

    /// Resamples onto the target grid, rewrites every no-data encoding to
    /// the configured value, and trims fully-empty border rows/columns.
    fn normalize(&self, raster: Raster) -> Result<Raster, RasterError> {
        let mut raster = if (raster.resolution() - self.resolution).abs() > 1e-9 {
            raster.resample_bilinear(self.resolution)?
        } else {
            raster
        };
        raster.normalize_nodata(self.nodata);
        raster.trim_nodata_border()
    }
}

/// Writes the raster and its provenance sidecar on the blocking pool.
async fn write_output(output: &TileOutput, raster: Raster) -> Result<(), AcquireError> {
    let storage = |path: &Path, message: String| AcquireError::Storage {
        path: path.to_path_buf(),
        message,
    };

    let sidecar = output.sidecar_path();
    let json = serde_json::to_string_pretty(output)
        .map_err(|e| storage(&sidecar, e.to_string()))?;

    let path = output.path.clone();
    let crs = output.crs.clone();
    let write_path = path.clone();
    let sidecar_path = sidecar.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<(), (PathBuf, String)> {
        write_geotiff(&write_path, &raster, &crs)
            .map_err(|e| (write_path.clone(), e.to_string()))?;
        std::fs::write(&sidecar_path, json).map_err(|e| (sidecar_path.clone(), e.to_string()))
    })
    .await;

    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err((at, message))) => Err(storage(&at, message)),
        Err(join_err) => Err(storage(&path, join_err.to_string())),
    }
}
