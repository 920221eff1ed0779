//! Mosaic manifest construction.
//!
//! The per-tile rasters are assembled into a single virtual mosaic: a
//! GDAL-style `.vrt` XML manifest referencing every source in paint
//! order. VRT readers paint sources in listed order, later sources
//! overwriting earlier ones except where NODATA-masked, so the coarse
//! fallback layer comes first and tiles follow coarsest to finest: the
//! finest valid pixel wins everywhere. The manifest is cheap to rebuild
//! and always rebuilt from scratch.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::acquire::TileOutput;
use crate::config::{Crs, PipelineConfig};
use crate::raster::{decode_geotiff, Bounds};

/// Errors raised while building a mosaic manifest.
#[derive(Debug, Error)]
pub enum MosaicError {
    #[error("no tile sources to mosaic")]
    NoSources,

    #[error("mosaic manifest {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("fallback layer {path}: {message}")]
    Fallback { path: PathBuf, message: String },
}

/// A coarse layer painted under the fine tiles.
#[derive(Clone, Debug)]
pub struct FallbackLayer {
    /// File path or URL of the layer.
    pub location: String,
    pub bounds: Bounds,
    pub resolution: f64,
    pub nodata: f32,
}

impl FallbackLayer {
    /// Builds a fallback layer from a local basemap file, reading its
    /// georeferencing from the file itself.
    pub fn from_basemap(path: &Path) -> Result<Self, MosaicError> {
        let err = |message: String| MosaicError::Fallback {
            path: path.to_path_buf(),
            message,
        };
        let bytes = std::fs::read(path).map_err(|e| err(e.to_string()))?;
        let raster = decode_geotiff(&bytes).map_err(|e| err(e.to_string()))?;
        Ok(Self {
            location: path.display().to_string(),
            bounds: raster.bounds(),
            resolution: raster.resolution(),
            nodata: raster.nodata().unwrap_or(crate::config::DEFAULT_NODATA),
        })
    }
}

/// Builds the virtual mosaic manifest for a run.
pub struct MosaicBuilder {
    resolution: f64,
    crs: Crs,
    nodata: f32,
    path: PathBuf,
}

impl MosaicBuilder {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            resolution: config.resolution,
            crs: config.crs.clone(),
            nodata: config.nodata,
            path: config.mosaic_path(),
        }
    }

    /// Writes the manifest and returns its path.
    ///
    /// A run with zero successful tiles has nothing worth mosaicking,
    /// fallback or not, and is an error.
    pub fn build(
        &self,
        outputs: &[TileOutput],
        fallbacks: &[FallbackLayer],
    ) -> Result<PathBuf, MosaicError> {
        if outputs.is_empty() {
            return Err(MosaicError::NoSources);
        }

        // Later sources overwrite earlier ones, so coarse tiles are listed
        // before fine ones and the fallback goes first of all.
        let mut ordered: Vec<&TileOutput> = outputs.iter().collect();
        ordered.sort_by(|a, b| {
            b.resolution
                .total_cmp(&a.resolution)
                .then_with(|| a.tile_id.cmp(&b.tile_id))
        });

        let mut extent = ordered[0].bounds;
        for output in &ordered[1..] {
            extent = extent.union(&output.bounds);
        }
        for fallback in fallbacks {
            extent = extent.union(&fallback.bounds);
        }

        let raster_x_size = (extent.width() / self.resolution).ceil() as usize;
        let raster_y_size = (extent.height() / self.resolution).ceil() as usize;

        let mut sources = Vec::with_capacity(ordered.len() + fallbacks.len());
        for fallback in fallbacks {
            sources.push(self.complex_source(
                fallback.location.clone(),
                &fallback.bounds,
                fallback.resolution,
                fallback.nodata,
                &extent,
            ));
        }
        for output in &ordered {
            sources.push(self.complex_source(
                output.path.display().to_string(),
                &output.bounds,
                output.resolution,
                output.nodata,
                &extent,
            ));
        }

        let dataset = VrtDataset {
            raster_x_size,
            raster_y_size,
            srs: Srs {
                axis_mapping: "1,2".to_string(),
                value: self.crs.as_str().to_string(),
            },
            geo_transform: format!(
                "{:.10}, {:.10}, 0.0, {:.10}, 0.0, -{:.10}",
                extent.min_x, self.resolution, extent.max_y, self.resolution
            ),
            band: VrtRasterBand {
                data_type: "Float32".to_string(),
                band: 1,
                nodata: self.nodata,
                sources,
            },
        };

        let write_err = |message: String| MosaicError::Write {
            path: self.path.clone(),
            message,
        };
        let mut xml = String::new();
        let mut serializer = quick_xml::se::Serializer::new(&mut xml);
        serializer.indent(' ', 2);
        dataset
            .serialize(serializer)
            .map_err(|e| write_err(e.to_string()))?;

        // Rebuilds are destructive; a stale manifest must never survive.
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| write_err(e.to_string()))?;
        }
        std::fs::write(&self.path, xml).map_err(|e| write_err(e.to_string()))?;

        info!(
            path = %self.path.display(),
            tiles = ordered.len(),
            fallbacks = fallbacks.len(),
            width = raster_x_size,
            height = raster_y_size,
            "mosaic manifest written"
        );
        Ok(self.path.clone())
    }

    fn complex_source(
        &self,
        location: String,
        bounds: &Bounds,
        resolution: f64,
        nodata: f32,
        extent: &Bounds,
    ) -> ComplexSource {
        let src_w = (bounds.width() / resolution).round();
        let src_h = (bounds.height() / resolution).round();
        ComplexSource {
            filename: SourceFilename {
                relative: 0,
                value: location,
            },
            band: 1,
            src_rect: RectElem {
                x_off: 0.0,
                y_off: 0.0,
                x_size: src_w,
                y_size: src_h,
            },
            dst_rect: RectElem {
                x_off: (bounds.min_x - extent.min_x) / self.resolution,
                y_off: (extent.max_y - bounds.max_y) / self.resolution,
                x_size: bounds.width() / self.resolution,
                y_size: bounds.height() / self.resolution,
            },
            nodata,
        }
    }
}

// GDAL VRT schema subset.

#[derive(Serialize)]
#[serde(rename = "VRTDataset")]
struct VrtDataset {
    #[serde(rename = "@rasterXSize")]
    raster_x_size: usize,
    #[serde(rename = "@rasterYSize")]
    raster_y_size: usize,
    #[serde(rename = "SRS")]
    srs: Srs,
    #[serde(rename = "GeoTransform")]
    geo_transform: String,
    #[serde(rename = "VRTRasterBand")]
    band: VrtRasterBand,
}

#[derive(Serialize)]
struct Srs {
    #[serde(rename = "@dataAxisToSRSAxisMapping")]
    axis_mapping: String,
    #[serde(rename = "$text")]
    value: String,
}

#[derive(Serialize)]
struct VrtRasterBand {
    #[serde(rename = "@dataType")]
    data_type: String,
    #[serde(rename = "@band")]
    band: u32,
    #[serde(rename = "NoDataValue")]
    nodata: f32,
    #[serde(rename = "ComplexSource")]
    sources: Vec<ComplexSource>,
}

#[derive(Serialize)]
struct ComplexSource {
    #[serde(rename = "SourceFilename")]
    filename: SourceFilename,
    #[serde(rename = "SourceBand")]
    band: u32,
    #[serde(rename = "SrcRect")]
    src_rect: RectElem,
    #[serde(rename = "DstRect")]
    dst_rect: RectElem,
    #[serde(rename = "NODATA")]
    nodata: f32,
}

#[derive(Serialize)]
struct SourceFilename {
    #[serde(rename = "@relativeToVRT")]
    relative: u8,
    #[serde(rename = "$text")]
    value: String,
}

#[derive(Serialize)]
struct RectElem {
    #[serde(rename = "@xOff")]
    x_off: f64,
    #[serde(rename = "@yOff")]
    y_off: f64,
    #[serde(rename = "@xSize")]
    x_size: f64,
    #[serde(rename = "@ySize")]
    y_size: f64,
}
