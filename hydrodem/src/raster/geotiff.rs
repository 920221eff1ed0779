//! GeoTIFF encode/decode for elevation grids.
//!
//! Decoding accepts anything the services return (stripped or tiled, any
//! integer or float sample type) and coerces to `f32`. Encoding writes
//! LZW-compressed `f32` pages with GeoTIFF georeferencing tags plus
//! reduced-resolution overview pages.

use std::fs::File;
use std::io::{BufWriter, Cursor};
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::compression::Lzw;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

use crate::config::Crs;

use super::{GeoTransform, Raster, RasterError};

/// ProjectedCSType geo key (EPSG code of a projected CRS).
const GEO_KEY_PROJECTED_CS_TYPE: u16 = 3072;

/// Number of overview pages written after the full-resolution page.
const OVERVIEW_COUNT: usize = 5;
/// Overviews stop once either dimension would drop below this.
const MIN_OVERVIEW_DIM: usize = 32;

/// Decodes a GeoTIFF byte buffer into a [`Raster`].
///
/// The ModelPixelScale and ModelTiepoint tags are required; the GDAL
/// no-data tag is honored when present.
pub fn decode_geotiff(bytes: &[u8]) -> Result<Raster, RasterError> {
    let mut decoder = Decoder::new(Cursor::new(bytes))?.with_limits(Limits::unlimited());
    let (width, height) = decoder.dimensions()?;

    let scale = decoder
        .get_tag_f64_vec(Tag::ModelPixelScaleTag)
        .map_err(|_| RasterError::MissingGeoTag("ModelPixelScale"))?;
    let tiepoint = decoder
        .get_tag_f64_vec(Tag::ModelTiepointTag)
        .map_err(|_| RasterError::MissingGeoTag("ModelTiepoint"))?;
    if scale.len() < 2 {
        return Err(RasterError::MissingGeoTag("ModelPixelScale"));
    }
    if tiepoint.len() < 6 {
        return Err(RasterError::MissingGeoTag("ModelTiepoint"));
    }
    // Tiepoint is [i, j, k, x, y, z]: pixel (i, j) maps to geo (x, y).
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
    let transform = GeoTransform::new(origin_x, origin_y, scale[0]);

    let nodata = decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|s| s.trim().parse::<f32>().ok());

    let data = decode_samples(&mut decoder)?;
    Raster::new(data, width as usize, height as usize, transform, nodata)
}

/// Reads the first image page and coerces samples to `f32`.
fn decode_samples<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Result<Vec<f32>, RasterError> {
    let result = decoder.read_image()?;
    let data = match result {
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::I16(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U8(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::U16(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f32).collect(),
    };
    Ok(data)
}

/// Writes a raster as an LZW-compressed GeoTIFF with overview pages.
pub fn write_geotiff(path: &Path, raster: &Raster, crs: &Crs) -> Result<(), RasterError> {
    let file = File::create(path)?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file))?;

    write_page(&mut encoder, raster, crs, false)?;

    let mut overview = raster.downsample_half();
    for _ in 0..OVERVIEW_COUNT {
        if overview.width() < MIN_OVERVIEW_DIM || overview.height() < MIN_OVERVIEW_DIM {
            break;
        }
        write_page(&mut encoder, &overview, crs, true)?;
        overview = overview.downsample_half();
    }
    Ok(())
}

fn write_page<W: std::io::Write + std::io::Seek>(
    encoder: &mut TiffEncoder<W>,
    raster: &Raster,
    crs: &Crs,
    is_overview: bool,
) -> Result<(), RasterError> {
    let mut image = encoder.new_image_with_compression::<Gray32Float, _>(
        raster.width() as u32,
        raster.height() as u32,
        Lzw,
    )?;

    let t = raster.transform();
    image.encoder().write_tag(
        Tag::ModelPixelScaleTag,
        &[t.pixel_size, t.pixel_size, 0.0][..],
    )?;
    image.encoder().write_tag(
        Tag::ModelTiepointTag,
        &[0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0][..],
    )?;
    if let Some(code) = crs.epsg_code() {
        // Minimal GeoKeyDirectory: version 1.1.0, one key, projected CRS code.
        image.encoder().write_tag(
            Tag::GeoKeyDirectoryTag,
            &[1u16, 1, 0, 1, GEO_KEY_PROJECTED_CS_TYPE, 0, 1, code as u16][..],
        )?;
    }
    if let Some(ndv) = raster.nodata() {
        image
            .encoder()
            .write_tag(Tag::GdalNodata, ndv.to_string().as_str())?;
    }
    if is_overview {
        // Mark reduced-resolution pages per the TIFF spec.
        image.encoder().write_tag(Tag::NewSubfileType, 1u32)?;
    }

    image.write_data(raster.data())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    fn sample_raster() -> Raster {
        let data: Vec<f32> = (0..64 * 64).map(|i| i as f32 * 0.25).collect();
        Raster::new(
            data,
            64,
            64,
            GeoTransform::new(500_000.0, 1_500_000.0, 10.0),
            Some(-999_999.0),
        )
        .unwrap()
    }

    #[test]
    fn test_write_then_decode_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tile.tif");
        let raster = sample_raster();

        write_geotiff(&path, &raster, &Crs::epsg(5070)).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let decoded = decode_geotiff(&bytes).unwrap();

        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 64);
        assert_eq!(decoded.nodata(), Some(-999_999.0));
        let t = decoded.transform();
        assert_relative_eq!(t.origin_x, 500_000.0);
        assert_relative_eq!(t.origin_y, 1_500_000.0);
        assert_relative_eq!(t.pixel_size, 10.0);
        assert_eq!(decoded.data(), raster.data());
    }

    #[test]
    fn test_decode_reads_tags_written_by_raw_id() {
        // Foreign writers emit georeferencing tags by numeric id; on disk
        // that is indistinguishable from the named variants, and the
        // decoder must resolve them either way.
        let mut buf = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut buf).unwrap();
            let mut image = encoder.new_image::<Gray32Float>(4, 4).unwrap();
            image
                .encoder()
                .write_tag(Tag::Unknown(33550), &[10.0f64, 10.0, 0.0][..])
                .unwrap();
            image
                .encoder()
                .write_tag(
                    Tag::Unknown(33922),
                    &[0.0f64, 0.0, 0.0, 500_000.0, 1_500_000.0, 0.0][..],
                )
                .unwrap();
            image.write_data(&[1.0f32; 16]).unwrap();
        }

        let decoded = decode_geotiff(buf.get_ref()).unwrap();
        assert_relative_eq!(decoded.transform().pixel_size, 10.0);
        assert_relative_eq!(decoded.transform().origin_x, 500_000.0);
    }

    #[test]
    fn test_decode_rejects_plain_tiff() {
        // A TIFF without georeferencing tags must not decode as a raster.
        let mut buf = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut buf).unwrap();
            let image = encoder
                .new_image::<Gray32Float>(4, 4)
                .unwrap();
            image.write_data(&[0.0f32; 16]).unwrap();
        }
        let result = decode_geotiff(buf.get_ref());
        assert!(matches!(result, Err(RasterError::MissingGeoTag(_))));
    }

    #[test]
    fn test_decode_garbage_is_error() {
        assert!(decode_geotiff(&[0xDE, 0xAD, 0xBE, 0xEF]).is_err());
    }
}
