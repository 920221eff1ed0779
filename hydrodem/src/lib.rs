//! HydroDEM - Elevation tile acquisition and mosaic assembly
//!
//! This library acquires elevation raster tiles covering large, irregular
//! watershed regions from remote raster services, normalizes them, and
//! assembles the results into a seamless virtual mosaic for downstream
//! hydraulic modeling.
//!
//! # Pipeline
//!
//! 1. A [`region::Region`] (watershed polygon + CRS) is partitioned by the
//!    [`tiler`] into service-size-bounded, overlap-buffered tiles.
//! 2. The [`scheduler`] dispatches one [`acquire::AcquisitionStrategy`] job
//!    per tile across a bounded worker pool, skipping tiles already recorded
//!    in the [`ledger`].
//! 3. Each job fetches from a dynamic raster service with bounded retries,
//!    falls back to a static pre-rendered source, normalizes resolution and
//!    no-data encoding, and writes a compressed GeoTIFF.
//! 4. The [`mosaic`] builder composes all tile outputs (plus an optional
//!    coarse fallback basemap) into a single virtual raster manifest.

pub mod acquire;
pub mod config;
pub mod ledger;
pub mod mosaic;
pub mod pipeline;
pub mod raster;
pub mod region;
pub mod scheduler;
pub mod source;
pub mod tiler;

pub use acquire::{
    AcquireError, AcquireOutcome, AcquisitionStrategy, RetryPolicy, SourceKind, TileOutput,
};
pub use config::{Crs, PipelineConfig};
pub use ledger::{JobLedger, LedgerError};
pub use mosaic::{FallbackLayer, MosaicBuilder, MosaicError};
pub use pipeline::{collect_tile_outputs, plan_tiles, Pipeline, PipelineError, RunReport};
pub use raster::{Bounds, GeoTransform, Raster, RasterError};
pub use region::{Region, RegionError, RegionSource};
pub use scheduler::{
    AcquisitionJob, JobStatus, ParallelScheduler, RunSummary, SchedulerError, WorkerPool,
};
pub use source::{
    AsyncHttpClient, AsyncReqwestClient, DynamicServiceSource, ElevationSource, FetchRequest,
    SourceError, StaticBasemapSource, TileUrlList,
};
pub use tiler::{load_tiles, save_tiles, Tile, TileGenerator, TilerError};
