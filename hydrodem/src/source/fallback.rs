//! Static basemap fallback source.
//!
//! Serves elevation windows out of a single coarse, pre-acquired GeoTIFF
//! held in memory. Unlike the dynamic service it cannot fail transiently,
//! which is what makes it a useful last resort.

use std::path::Path;

use tracing::info;

use super::{ElevationSource, FetchRequest, SourceError};
use crate::raster::{decode_geotiff, Raster, RasterError};

/// Elevation source backed by a local coarse basemap raster.
#[derive(Debug)]
pub struct StaticBasemapSource {
    basemap: Raster,
    name: String,
}

impl StaticBasemapSource {
    /// Opens and decodes a basemap file.
    pub async fn open(path: &Path) -> Result<Self, SourceError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| SourceError::Basemap(format!("{}: {}", path.display(), e)))?;
        let basemap = decode_geotiff(&bytes)
            .map_err(|e| SourceError::Basemap(format!("{}: {}", path.display(), e)))?;
        info!(
            path = %path.display(),
            width = basemap.width(),
            height = basemap.height(),
            resolution = basemap.resolution(),
            "loaded static basemap"
        );
        Ok(Self::from_raster(basemap, "static-basemap"))
    }

    /// Wraps an already decoded raster.
    pub fn from_raster(basemap: Raster, name: impl Into<String>) -> Self {
        Self {
            basemap,
            name: name.into(),
        }
    }

    /// Native resolution of the underlying basemap.
    pub fn resolution(&self) -> f64 {
        self.basemap.resolution()
    }
}

impl ElevationSource for StaticBasemapSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Raster, SourceError> {
        let window = match self.basemap.crop(&request.bounds) {
            Ok(window) => window,
            Err(RasterError::EmptyWindow) => return Err(SourceError::EmptySlice),
            Err(e) => return Err(e.into()),
        };
        if window.valid_count() == 0 {
            return Err(SourceError::EmptySlice);
        }
        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Crs;
    use crate::raster::{Bounds, GeoTransform};

    fn request(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> FetchRequest {
        FetchRequest {
            bounds: Bounds::new(min_x, min_y, max_x, max_y),
            resolution: 10.0,
            crs: Crs::epsg(5070),
            nodata: -999_999.0,
        }
    }

    fn basemap() -> Raster {
        // 100x100 cells at 10m covering (0,0)..(1000,1000).
        Raster::filled(
            7.5,
            100,
            100,
            GeoTransform::new(0.0, 1000.0, 10.0),
            Some(-999_999.0),
        )
    }

    #[tokio::test]
    async fn test_fetch_returns_overlapping_window() {
        let source = StaticBasemapSource::from_raster(basemap(), "test-basemap");
        let raster = source
            .fetch(&request(100.0, 100.0, 300.0, 200.0))
            .await
            .unwrap();
        assert_eq!(raster.width(), 20);
        assert_eq!(raster.height(), 10);
        assert_eq!(raster.get(0, 0), 7.5);
    }

    #[tokio::test]
    async fn test_fetch_outside_coverage_is_empty_slice() {
        let source = StaticBasemapSource::from_raster(basemap(), "test-basemap");
        let err = source
            .fetch(&request(5000.0, 5000.0, 6000.0, 6000.0))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::EmptySlice));
    }

    #[tokio::test]
    async fn test_fetch_all_nodata_window_is_empty_slice() {
        let nodata_map = Raster::filled(
            -999_999.0,
            100,
            100,
            GeoTransform::new(0.0, 1000.0, 10.0),
            Some(-999_999.0),
        );
        let source = StaticBasemapSource::from_raster(nodata_map, "test-basemap");
        let err = source
            .fetch(&request(100.0, 100.0, 300.0, 200.0))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::EmptySlice));
    }

    #[tokio::test]
    async fn test_open_missing_file_is_basemap_error() {
        let err = StaticBasemapSource::open(Path::new("/nonexistent/coarse.tif"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Basemap(_)));
    }
}
