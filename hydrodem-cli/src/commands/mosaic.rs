//! `hydrodem mosaic` - rebuild the mosaic manifest from existing tiles.

use std::path::PathBuf;

use clap::Args;
use hydrodem::config::DEFAULT_FALLBACK_RESOLUTION;
use hydrodem::{collect_tile_outputs, Bounds, FallbackLayer, MosaicBuilder, TileUrlList};

use crate::commands::common::GridArgs;
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct MosaicArgs {
    /// Directory holding the tiles of a previous run
    #[arg(long)]
    pub output_dir: PathBuf,

    /// Local coarse fallback basemap GeoTIFF
    #[arg(long, conflicts_with = "fallback_urls")]
    pub fallback_basemap: Option<PathBuf>,

    /// Line-delimited file of remote fallback raster URLs
    #[arg(long)]
    pub fallback_urls: Option<PathBuf>,

    /// Extent covered by the fallback URLs, as `minx,miny,maxx,maxy`
    #[arg(long)]
    pub fallback_bounds: Option<String>,

    /// Resolution of the fallback rasters, in CRS units
    #[arg(long, default_value_t = DEFAULT_FALLBACK_RESOLUTION)]
    pub fallback_resolution: f64,

    #[command(flatten)]
    pub grid: GridArgs,
}

pub fn run(args: MosaicArgs) -> Result<(), CliError> {
    let config = args.grid.to_config(args.output_dir.clone());

    let fallbacks = fallback_layers(&args, config.nodata)?;
    let outputs = collect_tile_outputs(&config.tile_dir())?;
    let path = MosaicBuilder::new(&config).build(&outputs, &fallbacks)?;

    println!(
        "Mosaic rebuilt from {} tile(s) and {} fallback layer(s): {}",
        outputs.len(),
        fallbacks.len(),
        path.display()
    );
    Ok(())
}

fn fallback_layers(args: &MosaicArgs, nodata: f32) -> Result<Vec<FallbackLayer>, CliError> {
    if let Some(basemap) = &args.fallback_basemap {
        return Ok(vec![FallbackLayer::from_basemap(basemap)?]);
    }

    let Some(list_path) = &args.fallback_urls else {
        return Ok(Vec::new());
    };
    let bounds_arg = args.fallback_bounds.as_deref().ok_or_else(|| {
        CliError::Args("--fallback-urls requires --fallback-bounds".to_string())
    })?;
    let bounds = parse_bounds(bounds_arg)?;

    let urls = TileUrlList::load(list_path).map_err(|e| CliError::Source(e.to_string()))?;
    Ok(urls
        .urls()
        .iter()
        .map(|url| FallbackLayer {
            location: url.clone(),
            bounds,
            resolution: args.fallback_resolution,
            nodata,
        })
        .collect())
}

fn parse_bounds(text: &str) -> Result<Bounds, CliError> {
    let invalid = || {
        CliError::Args(format!(
            "invalid bounds '{}': expected minx,miny,maxx,maxy",
            text
        ))
    };
    let parts: Vec<f64> = text
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid())?;
    let [min_x, min_y, max_x, max_y] = parts[..] else {
        return Err(invalid());
    };
    if min_x >= max_x || min_y >= max_y {
        return Err(invalid());
    }
    Ok(Bounds::new(min_x, min_y, max_x, max_y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bounds_accepts_well_formed_extent() {
        let bounds = parse_bounds("0, -10, 100, 50").unwrap();
        assert_eq!(bounds.min_x, 0.0);
        assert_eq!(bounds.min_y, -10.0);
        assert_eq!(bounds.max_x, 100.0);
        assert_eq!(bounds.max_y, 50.0);
    }

    #[test]
    fn test_parse_bounds_rejects_garbage_and_inverted_extents() {
        assert!(parse_bounds("1,2,3").is_err());
        assert!(parse_bounds("a,b,c,d").is_err());
        assert!(parse_bounds("10,0,5,20").is_err());
    }
}
