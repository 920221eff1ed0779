//! Elevation data sources.
//!
//! A source turns a georeferenced fetch request into a decoded [`Raster`].
//! Two tiers exist: a dynamic image service queried per tile
//! ([`DynamicServiceSource`]) and a coarse static fallback, either a second
//! service at a lower resolution or a local basemap file
//! ([`StaticBasemapSource`]).

mod dynamic;
mod fallback;
mod http;
mod urls;

pub use dynamic::DynamicServiceSource;
pub use fallback::StaticBasemapSource;
pub use http::{AsyncHttpClient, AsyncReqwestClient};
pub use urls::TileUrlList;

#[cfg(test)]
pub use http::tests::MockAsyncHttpClient;

use std::future::Future;

use thiserror::Error;

use crate::config::Crs;
use crate::raster::{Bounds, Raster, RasterError};

/// Errors raised while fetching elevation data.
#[derive(Clone, Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("service rejected request: {0}")]
    Service(String),

    #[error("response is not a usable raster: {0}")]
    Decode(String),

    #[error("source has no data covering the requested extent")]
    EmptySlice,

    #[error("basemap error: {0}")]
    Basemap(String),
}

impl SourceError {
    /// Whether a retry of the same request could plausibly succeed.
    ///
    /// An empty slice is a definitive answer from the source, not a fault;
    /// everything else (network, service, malformed payload) is worth
    /// retrying.
    pub fn retryable(&self) -> bool {
        !matches!(self, SourceError::EmptySlice)
    }
}

impl From<RasterError> for SourceError {
    fn from(err: RasterError) -> Self {
        SourceError::Decode(err.to_string())
    }
}

/// A single elevation fetch: extent, grid, and missing-data encoding.
#[derive(Clone, Debug)]
pub struct FetchRequest {
    pub bounds: Bounds,
    pub resolution: f64,
    pub crs: Crs,
    pub nodata: f64,
}

impl FetchRequest {
    /// Requested grid width in pixels.
    pub fn width_px(&self) -> u32 {
        ((self.bounds.width() / self.resolution).ceil() as u32).max(1)
    }

    /// Requested grid height in pixels.
    pub fn height_px(&self) -> u32 {
        ((self.bounds.height() / self.resolution).ceil() as u32).max(1)
    }
}

/// An elevation data source.
///
/// Implementations return a decoded raster covering the requested extent,
/// or [`SourceError::EmptySlice`] when the source has no valid pixels
/// there.
pub trait ElevationSource: Send + Sync {
    /// Human-readable source name, used in logs and provenance.
    fn name(&self) -> &str;

    /// Fetches elevation data for the requested extent.
    fn fetch(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<Raster, SourceError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_request_pixel_dimensions() {
        let request = FetchRequest {
            bounds: Bounds::new(0.0, 0.0, 1000.0, 500.0),
            resolution: 10.0,
            crs: Crs::epsg(5070),
            nodata: -999_999.0,
        };
        assert_eq!(request.width_px(), 100);
        assert_eq!(request.height_px(), 50);
    }

    #[test]
    fn test_fetch_request_rounds_partial_pixels_up() {
        let request = FetchRequest {
            bounds: Bounds::new(0.0, 0.0, 1005.0, 3.0),
            resolution: 10.0,
            crs: Crs::epsg(5070),
            nodata: -999_999.0,
        };
        assert_eq!(request.width_px(), 101);
        assert_eq!(request.height_px(), 1);
    }

    #[test]
    fn test_empty_slice_is_not_retryable() {
        assert!(!SourceError::EmptySlice.retryable());
        assert!(SourceError::Http("timeout".into()).retryable());
        assert!(SourceError::Service("bbox too large".into()).retryable());
    }
}
