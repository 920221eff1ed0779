//! End-to-end acquisition pipeline.
//!
//! Wires the components together: resolve regions, partition them into
//! tiles, acquire every tile through the scheduler, then assemble the
//! mosaic manifest and write a run report.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::acquire::{AcquisitionStrategy, TileOutput};
use crate::config::PipelineConfig;
use crate::ledger::{JobLedger, LedgerError};
use crate::mosaic::{FallbackLayer, MosaicBuilder, MosaicError};
use crate::region::{RegionError, RegionSource, DEFAULT_ID_PROPERTY};
use crate::scheduler::{ParallelScheduler, RunSummary, SchedulerError};
use crate::source::ElevationSource;
use crate::tiler::{Tile, TileGenerator, TilerError};

/// File name of the JSON run report, written into the output directory.
const REPORT_FILE: &str = "run_report.json";

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Region(#[from] RegionError),

    #[error(transparent)]
    Tiler(#[from] TilerError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Mosaic(#[from] MosaicError),

    #[error("output directory {0} already holds a run (use overwrite or resume)")]
    OutputExists(PathBuf),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Summary of a completed run, also written as JSON next to the outputs.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub regions: usize,
    pub tiles_planned: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: Vec<String>,
    pub mosaic: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// The full acquisition pipeline.
pub struct Pipeline<D, F>
where
    D: ElevationSource + 'static,
    F: ElevationSource + 'static,
{
    config: PipelineConfig,
    strategy: Arc<AcquisitionStrategy<D, F>>,
}

/// Partitions regions into acquisition tiles without running anything.
///
/// Used by the standalone tiling step; the tiles can be saved with
/// [`crate::tiler::save_tiles`] and fed back into a later run.
pub fn plan_tiles(
    config: &PipelineConfig,
    regions: RegionSource,
) -> Result<Vec<Tile>, PipelineError> {
    let regions = regions.resolve(DEFAULT_ID_PROPERTY, &config.crs)?;
    let generator = TileGenerator::new(config.max_tile_size(), config.edge_buffer())?;

    let mut tiles = Vec::new();
    for region in &regions {
        let mut region_tiles = generator.generate(region)?;
        info!(
            region = region.id(),
            tiles = region_tiles.len(),
            "region partitioned"
        );
        tiles.append(&mut region_tiles);
    }
    Ok(tiles)
}

/// Loads tile provenance sidecars from a tile directory, keeping only
/// records whose raster files still exist.
pub fn collect_tile_outputs(tile_dir: &std::path::Path) -> Result<Vec<TileOutput>, PipelineError> {
    let io_err = |source: std::io::Error| PipelineError::Io {
        path: tile_dir.to_path_buf(),
        source,
    };

    let mut outputs = Vec::new();
    for entry in std::fs::read_dir(tile_dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let text = std::fs::read_to_string(&path).map_err(io_err)?;
        match serde_json::from_str::<TileOutput>(&text) {
            Ok(output) if output.path.exists() => outputs.push(output),
            Ok(output) => {
                warn!(
                    tile_id = %output.tile_id,
                    "sidecar present but raster missing, excluding from mosaic"
                );
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable sidecar, skipping");
            }
        }
    }
    Ok(outputs)
}

impl<D, F> Pipeline<D, F>
where
    D: ElevationSource + 'static,
    F: ElevationSource + 'static,
{
    pub fn new(config: PipelineConfig, dynamic: D, fallback: Option<F>) -> Self {
        let strategy = Arc::new(AcquisitionStrategy::new(&config, dynamic, fallback));
        Self { config, strategy }
    }

    /// Runs the whole pipeline for the given regions.
    pub async fn run(&self, regions: RegionSource) -> Result<RunReport, PipelineError> {
        let regions = regions.resolve(DEFAULT_ID_PROPERTY, &self.config.crs)?;
        let region_count = regions.len();
        let tiles = plan_tiles(&self.config, RegionSource::InMemory(regions))?;
        self.run_tiles(tiles, region_count).await
    }

    /// Runs acquisition and mosaicking over pre-planned tiles.
    pub async fn run_tiles(
        &self,
        tiles: Vec<Tile>,
        regions: usize,
    ) -> Result<RunReport, PipelineError> {
        let started_at = Utc::now();
        self.prepare_output_dir()?;

        let ledger = Arc::new(JobLedger::open(&self.config.ledger_path())?);
        let scheduler = ParallelScheduler::new(
            self.config.workers,
            self.config.scheduler_retries,
            Arc::clone(&ledger),
        );

        let tiles_planned = tiles.len();
        let strategy = Arc::clone(&self.strategy);
        let summary = scheduler
            .run(tiles, move |tile| {
                let strategy = Arc::clone(&strategy);
                async move { strategy.acquire(&tile).await }
            })
            .await?;

        let outputs = self.collect_outputs(&summary)?;
        let fallbacks = self.fallback_layers()?;
        let mosaic = MosaicBuilder::new(&self.config).build(&outputs, &fallbacks)?;

        let report = RunReport {
            regions,
            tiles_planned,
            succeeded: summary.succeeded.len(),
            skipped: summary.skipped.len(),
            failed: summary.failed.clone(),
            mosaic,
            started_at,
            finished_at: Utc::now(),
        };
        self.write_report(&report)?;

        if report.failed.is_empty() {
            info!(
                tiles = report.tiles_planned,
                succeeded = report.succeeded,
                skipped = report.skipped,
                "run complete"
            );
        } else {
            warn!(
                tiles = report.tiles_planned,
                succeeded = report.succeeded,
                skipped = report.skipped,
                failed = report.failed.len(),
                "run complete with failures"
            );
        }
        Ok(report)
    }

    /// Validates the overwrite/resume contract before any concurrent work
    /// starts, then creates the output layout.
    ///
    /// Overwriting clears every artifact of the previous run. Stale tile
    /// sidecars would otherwise be swept back into the mosaic, since tile
    /// ids are fresh per run and never collide with the old files.
    fn prepare_output_dir(&self) -> Result<(), PipelineError> {
        let io_err = |path: PathBuf| {
            move |source: std::io::Error| PipelineError::Io { path, source }
        };

        let ledger_path = self.config.ledger_path();
        if ledger_path.exists() && !self.config.overwrite && !self.config.resume {
            return Err(PipelineError::OutputExists(self.config.output_dir.clone()));
        }
        if self.config.overwrite {
            let tile_dir = self.config.tile_dir();
            for stale in [
                ledger_path.clone(),
                self.config.mosaic_path(),
                self.config.output_dir.join(REPORT_FILE),
            ] {
                if stale.exists() {
                    std::fs::remove_file(&stale).map_err(io_err(stale.clone()))?;
                }
            }
            if tile_dir.exists() {
                std::fs::remove_dir_all(&tile_dir).map_err(io_err(tile_dir.clone()))?;
            }
        }

        let tile_dir = self.config.tile_dir();
        std::fs::create_dir_all(&tile_dir).map_err(io_err(tile_dir))?;
        Ok(())
    }

    /// Gathers mosaic inputs: this run's outputs plus sidecar records from
    /// earlier resumed runs whose rasters still exist on disk.
    fn collect_outputs(&self, summary: &RunSummary) -> Result<Vec<TileOutput>, PipelineError> {
        let mut by_tile: std::collections::HashMap<String, TileOutput> =
            collect_tile_outputs(&self.config.tile_dir())?
                .into_iter()
                .map(|output| (output.tile_id.clone(), output))
                .collect();
        for output in &summary.succeeded {
            by_tile.insert(output.tile_id.clone(), output.clone());
        }
        Ok(by_tile.into_values().collect())
    }

    fn fallback_layers(&self) -> Result<Vec<FallbackLayer>, PipelineError> {
        match &self.config.fallback_basemap {
            Some(path) => Ok(vec![FallbackLayer::from_basemap(path)?]),
            None => Ok(Vec::new()),
        }
    }

    fn write_report(&self, report: &RunReport) -> Result<(), PipelineError> {
        let path = self.config.output_dir.join(REPORT_FILE);
        let json = serde_json::to_string_pretty(report).map_err(|e| PipelineError::Io {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        std::fs::write(&path, json).map_err(|e| PipelineError::Io { path, source: e })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::acquire::tests::{sample_raster, MockSource};
    use crate::config::Crs;
    use crate::region::Region;
    use crate::source::SourceError;
    use crate::tiler::rect_region;

    fn test_config(dir: &tempfile::TempDir) -> PipelineConfig {
        // 1000x1000 region with ~250-unit tiles: 4x4 = 16 tiles.
        let mut config = PipelineConfig::new(
            10.0,
            Crs::epsg(5070),
            dir.path().join("out"),
        )
        .with_workers(4)
        .with_max_retries(2)
        .with_retry_delay(Duration::ZERO);
        config.service_max_pixels = 841; // 29 px * 10m = 290m cells
        config.pixel_buffer = 1;
        config
    }

    fn region_source() -> RegionSource {
        RegionSource::InMemory(vec![rect_region("12090301", 0.0, 0.0, 1_000.0, 1_000.0)])
    }

    fn pipeline(
        config: PipelineConfig,
        dynamic: MockSource,
        fallback: Option<MockSource>,
    ) -> Pipeline<MockSource, MockSource> {
        Pipeline::new(config, dynamic, fallback)
    }

    #[tokio::test]
    async fn test_full_run_produces_tiles_mosaic_and_report() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let p = pipeline(
            config.clone(),
            MockSource::always("dynamic", Ok(sample_raster(42.0))),
            None,
        );

        let report = p.run(region_source()).await.unwrap();

        assert_eq!(report.regions, 1);
        assert!(report.tiles_planned >= 4);
        assert_eq!(report.succeeded, report.tiles_planned);
        assert!(report.failed.is_empty());
        assert!(report.mosaic.exists());
        assert!(config.output_dir.join("run_report.json").exists());
        assert_eq!(
            std::fs::read_dir(config.tile_dir())
                .unwrap()
                .filter(|e| {
                    e.as_ref().unwrap().path().extension().and_then(|x| x.to_str())
                        == Some("tif")
                })
                .count(),
            report.succeeded
        );
    }

    #[tokio::test]
    async fn test_second_run_without_flags_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let p = pipeline(
            config.clone(),
            MockSource::always("dynamic", Ok(sample_raster(1.0))),
            None,
        );
        p.run(region_source()).await.unwrap();

        let again = pipeline(
            config,
            MockSource::always("dynamic", Ok(sample_raster(1.0))),
            None,
        );
        let err = again.run(region_source()).await.unwrap_err();
        assert!(matches!(err, PipelineError::OutputExists(_)));
    }

    #[tokio::test]
    async fn test_overwrite_discards_previous_run_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let p = pipeline(
            config.clone(),
            MockSource::always("dynamic", Ok(sample_raster(1.0))),
            None,
        );
        let first = p.run(region_source()).await.unwrap();

        let overwrite_config = PipelineConfig {
            overwrite: true,
            ..config.clone()
        };
        let again = pipeline(
            overwrite_config,
            MockSource::always("dynamic", Ok(sample_raster(2.0))),
            None,
        );
        let second = again.run(region_source()).await.unwrap();
        assert_eq!(second.succeeded, first.succeeded);

        // Tile ids are fresh per run, so any stale raster or sidecar left
        // behind would double the tile directory and re-enter the mosaic.
        let tifs = std::fs::read_dir(config.tile_dir())
            .unwrap()
            .filter(|e| {
                e.as_ref().unwrap().path().extension().and_then(|x| x.to_str()) == Some("tif")
            })
            .count();
        assert_eq!(tifs, second.succeeded);
        let xml = std::fs::read_to_string(&second.mosaic).unwrap();
        assert_eq!(xml.matches("<ComplexSource>").count(), second.succeeded);
    }

    #[tokio::test]
    async fn test_resume_skips_ledgered_tiles_and_rebuilds_mosaic() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let tiles = plan_tiles(&config, region_source()).unwrap();
        let total = tiles.len();

        let p = pipeline(
            config.clone(),
            MockSource::always("dynamic", Ok(sample_raster(7.0))),
            None,
        );
        let first = p.run_tiles(tiles.clone(), 1).await.unwrap();
        assert_eq!(first.succeeded, total);

        let resumed_config = PipelineConfig {
            resume: true,
            ..config
        };
        let resumed = pipeline(
            resumed_config,
            MockSource::always("dynamic", Err(SourceError::Http("down".to_string()))),
            None,
        );
        let second = resumed.run_tiles(tiles, 1).await.unwrap();

        // Every tile is ledgered, no source call happens, and the mosaic is
        // rebuilt from the surviving sidecars.
        assert_eq!(second.succeeded, 0);
        assert_eq!(second.skipped, total);
        assert!(second.failed.is_empty());
        assert!(second.mosaic.exists());
    }

    #[tokio::test]
    async fn test_failed_tiles_are_reported_but_do_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        // One worker so the shared mock's response queue maps onto tiles
        // deterministically.
        let config = test_config(&dir).with_workers(1);
        // Dynamic fails one tile's worth of fetches, then stays healthy:
        // queue two failures (max_retries = 2) then repeat success.
        let mut responses: Vec<Result<crate::raster::Raster, SourceError>> = vec![
            Err(SourceError::Http("down".to_string())),
            Err(SourceError::Http("down".to_string())),
        ];
        responses.push(Ok(sample_raster(3.0)));
        let p = pipeline(
            config,
            MockSource::new("dynamic", responses),
            None,
        );

        let report = p.run(region_source()).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.succeeded, report.tiles_planned - 1);
        assert!(report.mosaic.exists());
    }

    #[tokio::test]
    async fn test_all_tiles_failing_yields_no_sources() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let p = pipeline(
            config,
            MockSource::always("dynamic", Err(SourceError::Http("down".to_string()))),
            None,
        );

        let err = p.run(region_source()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Mosaic(MosaicError::NoSources)));
    }

    #[tokio::test]
    async fn test_run_with_path_region_source() {
        let dir = tempfile::tempdir().unwrap();
        let geojson = r#"{
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": { "huc": "12090301" },
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[0,0],[1000,0],[1000,1000],[0,1000],[0,0]]]
                    }
                },
                {
                    "type": "Feature",
                    "properties": { "huc": "12090302" },
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[2000,0],[3000,0],[3000,1000],[2000,1000],[2000,0]]]
                    }
                }
            ]
        }"#;
        let region_path = dir.path().join("wbd.geojson");
        std::fs::write(&region_path, geojson).unwrap();

        let config = test_config(&dir);
        let p = pipeline(
            config,
            MockSource::always("dynamic", Ok(sample_raster(9.0))),
            None,
        );
        let report = p.run(RegionSource::Path(region_path)).await.unwrap();
        // Every feature in the boundary file counts as one region.
        assert_eq!(report.regions, 2);
        assert!(report.succeeded > 0);
    }
}
