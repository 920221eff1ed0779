//! Dynamic elevation image service source.
//!
//! Queries an ArcGIS-style image service `exportImage` endpoint for a
//! float32 GeoTIFF covering the requested extent, rendered server-side at
//! the requested resolution.

use tracing::{debug, trace};

use super::{AsyncHttpClient, ElevationSource, FetchRequest, SourceError};
use crate::raster::{decode_geotiff, Raster};

/// Elevation source backed by a dynamic image service.
///
/// The service renders each request on demand, so it can serve arbitrary
/// extents and resolutions but may fail transiently under load. Pair it
/// with a static fallback for resilience.
pub struct DynamicServiceSource<C: AsyncHttpClient> {
    http_client: C,
    base_url: String,
    name: String,
}

impl<C: AsyncHttpClient> DynamicServiceSource<C> {
    /// Creates a new dynamic service source.
    ///
    /// # Arguments
    ///
    /// * `http_client` - HTTP client for making requests
    /// * `base_url` - Image service root, without the `/exportImage` suffix
    /// * `name` - Source name for logs and provenance
    pub fn new(http_client: C, base_url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            name: name.into(),
        }
    }

    /// Builds the `exportImage` URL for a fetch request.
    fn build_url(&self, request: &FetchRequest) -> String {
        let b = &request.bounds;
        let sr = request
            .crs
            .epsg_code()
            .map(|code| code.to_string())
            .unwrap_or_else(|| request.crs.as_str().to_string());
        format!(
            "{}/exportImage?bbox={},{},{},{}&bboxSR={}&imageSR={}&size={},{}\
             &format=tiff&pixelType=F32&noData={}&interpolation=RSP_BilinearInterpolation&f=image",
            self.base_url,
            b.min_x,
            b.min_y,
            b.max_x,
            b.max_y,
            sr,
            sr,
            request.width_px(),
            request.height_px(),
            request.nodata,
        )
    }
}

impl<C: AsyncHttpClient> ElevationSource for DynamicServiceSource<C> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Raster, SourceError> {
        let url = self.build_url(request);
        trace!(source = %self.name, url = %url, "export request");

        let bytes = self.http_client.get(&url).await?;

        // Services report errors as JSON bodies with a 200 status.
        if bytes.starts_with(b"{") {
            let message = String::from_utf8_lossy(&bytes).into_owned();
            return Err(SourceError::Service(message));
        }

        let raster = decode_geotiff(&bytes)?;
        if raster.valid_count() == 0 {
            return Err(SourceError::EmptySlice);
        }

        debug!(
            source = %self.name,
            width = raster.width(),
            height = raster.height(),
            "export decoded"
        );
        Ok(raster)
    }
}
