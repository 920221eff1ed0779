//! Common argument groups shared across CLI commands.

use std::path::PathBuf;

use clap::Args;
use hydrodem::config::{
    DEFAULT_NODATA, DEFAULT_PIXEL_BUFFER, DEFAULT_SERVICE_MAX_PIXELS,
};
use hydrodem::{Crs, PipelineConfig};

/// Target grid parameters shared by every subcommand.
#[derive(Debug, Args)]
pub struct GridArgs {
    /// Target DEM resolution in CRS units
    #[arg(long, default_value_t = 10.0)]
    pub resolution: f64,

    /// EPSG code of the target CRS
    #[arg(long, default_value_t = 5070)]
    pub epsg: u32,

    /// No-data value written to all outputs
    #[arg(long, default_value_t = DEFAULT_NODATA)]
    pub nodata: f32,

    /// Maximum pixels per dynamic service request
    #[arg(long, default_value_t = DEFAULT_SERVICE_MAX_PIXELS)]
    pub max_pixels: u64,

    /// One-sided tile overlap, in pixels
    #[arg(long, default_value_t = DEFAULT_PIXEL_BUFFER)]
    pub pixel_buffer: u32,
}

impl GridArgs {
    pub fn to_config(&self, output_dir: PathBuf) -> PipelineConfig {
        let mut config = PipelineConfig::new(self.resolution, Crs::epsg(self.epsg), output_dir);
        config.nodata = self.nodata;
        config.service_max_pixels = self.max_pixels;
        config.pixel_buffer = self.pixel_buffer;
        config
    }
}
