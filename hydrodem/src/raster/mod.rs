//! In-memory raster grid model.
//!
//! A [`Raster`] is a single-band `f32` grid with a north-up geotransform and
//! an optional no-data value. This is the working representation between
//! fetching bytes from a source and writing a tile output: resampling to the
//! target grid, no-data normalization, and border trimming all operate here.

mod geotiff;

pub use geotiff::{decode_geotiff, write_geotiff};

use thiserror::Error;

/// Sentinel threshold for float32-minimum no-data encodings.
///
/// Elevation services encode missing pixels either as NaN or as a value at
/// (or within rounding error of) `f32::MIN` (-3.4028235e38). Anything at or
/// below this threshold is treated as source no-data.
pub const F32_MIN_SENTINEL_THRESHOLD: f32 = -3.0e38;

/// Tolerance when comparing a pixel against a declared no-data value.
const NODATA_EPSILON: f32 = 1e-3;

/// Errors raised by raster operations.
#[derive(Debug, Error)]
pub enum RasterError {
    #[error("raster dimensions {width}x{height} do not match data length {len}")]
    DimensionMismatch {
        width: usize,
        height: usize,
        len: usize,
    },

    #[error("raster has no valid pixels")]
    AllNodata,

    #[error("requested window does not overlap the raster grid")]
    EmptyWindow,

    #[error("TIFF codec error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("not a georeferenced TIFF: missing {0} tag")]
    MissingGeoTag(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// North-up affine georeferencing for a raster grid.
///
/// `origin_x`/`origin_y` locate the outer corner of the top-left pixel;
/// `pixel_size` is the square cell edge in CRS units. Rows increase
/// southward.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoTransform {
    /// X coordinate of the top-left corner.
    pub origin_x: f64,
    /// Y coordinate of the top-left corner.
    pub origin_y: f64,
    /// Cell edge length in CRS units.
    pub pixel_size: f64,
}

impl GeoTransform {
    /// Creates a geotransform from the top-left corner and cell size.
    pub fn new(origin_x: f64, origin_y: f64, pixel_size: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_size,
        }
    }

    /// Geographic X of a pixel center.
    pub fn pixel_center_x(&self, col: usize) -> f64 {
        self.origin_x + (col as f64 + 0.5) * self.pixel_size
    }

    /// Geographic Y of a pixel center.
    pub fn pixel_center_y(&self, row: usize) -> f64 {
        self.origin_y - (row as f64 + 0.5) * self.pixel_size
    }
}

/// Axis-aligned geographic bounds `(min_x, min_y, max_x, max_y)`.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Width in CRS units.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height in CRS units.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Smallest bounds covering both inputs.
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }
}

/// Single-band `f32` raster grid.
#[derive(Clone, Debug)]
pub struct Raster {
    data: Vec<f32>,
    width: usize,
    height: usize,
    transform: GeoTransform,
    nodata: Option<f32>,
}

impl Raster {
    /// Creates a raster, validating that `data` matches the dimensions.
    pub fn new(
        data: Vec<f32>,
        width: usize,
        height: usize,
        transform: GeoTransform,
        nodata: Option<f32>,
    ) -> Result<Self, RasterError> {
        if data.len() != width * height {
            return Err(RasterError::DimensionMismatch {
                width,
                height,
                len: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            transform,
            nodata,
        })
    }

    /// Creates a raster filled with a single value.
    pub fn filled(
        value: f32,
        width: usize,
        height: usize,
        transform: GeoTransform,
        nodata: Option<f32>,
    ) -> Self {
        Self {
            data: vec![value; width * height],
            width,
            height,
            transform,
            nodata,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn transform(&self) -> GeoTransform {
        self.transform
    }

    pub fn nodata(&self) -> Option<f32> {
        self.nodata
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Cell edge length in CRS units.
    pub fn resolution(&self) -> f64 {
        self.transform.pixel_size
    }

    /// Geographic bounds of the full grid.
    pub fn bounds(&self) -> Bounds {
        let t = self.transform;
        Bounds::new(
            t.origin_x,
            t.origin_y - self.height as f64 * t.pixel_size,
            t.origin_x + self.width as f64 * t.pixel_size,
            t.origin_y,
        )
    }

    /// Value at `(col, row)`; caller guarantees in-range indices.
    pub fn get(&self, col: usize, row: usize) -> f32 {
        self.data[row * self.width + col]
    }

    /// Returns true if `value` is missing data under any of the recognized
    /// encodings: NaN, the float32-minimum sentinel, or this raster's
    /// declared no-data value.
    pub fn is_nodata_value(&self, value: f32) -> bool {
        if value.is_nan() || value <= F32_MIN_SENTINEL_THRESHOLD {
            return true;
        }
        match self.nodata {
            Some(ndv) => (value - ndv).abs() < NODATA_EPSILON,
            None => false,
        }
    }

    /// Number of pixels holding a valid measurement.
    pub fn valid_count(&self) -> usize {
        self.data
            .iter()
            .filter(|v| !self.is_nodata_value(**v))
            .count()
    }

    /// Rewrites every no-data pixel (NaN, sentinel, or previously declared
    /// value) to `target` and declares `target` as the no-data value.
    pub fn normalize_nodata(&mut self, target: f32) {
        let previous = self.nodata;
        for v in &mut self.data {
            if v.is_nan()
                || *v <= F32_MIN_SENTINEL_THRESHOLD
                || matches!(previous, Some(ndv) if (*v - ndv).abs() < NODATA_EPSILON)
            {
                *v = target;
            }
        }
        self.nodata = Some(target);
    }

    /// Extracts the window of this raster overlapping `bounds`, snapped
    /// outward to whole pixels. Errors when the window is empty.
    pub fn crop(&self, bounds: &Bounds) -> Result<Raster, RasterError> {
        let t = self.transform;
        let col0 = ((bounds.min_x - t.origin_x) / t.pixel_size).floor().max(0.0) as usize;
        let row0 = ((t.origin_y - bounds.max_y) / t.pixel_size).floor().max(0.0) as usize;
        let col1 = (((bounds.max_x - t.origin_x) / t.pixel_size).ceil() as usize).min(self.width);
        let row1 = (((t.origin_y - bounds.min_y) / t.pixel_size).ceil() as usize).min(self.height);

        if col0 >= col1 || row0 >= row1 {
            return Err(RasterError::EmptyWindow);
        }

        let width = col1 - col0;
        let height = row1 - row0;
        let mut data = Vec::with_capacity(width * height);
        for row in row0..row1 {
            let start = row * self.width + col0;
            data.extend_from_slice(&self.data[start..start + width]);
        }
        Raster::new(
            data,
            width,
            height,
            GeoTransform::new(
                t.origin_x + col0 as f64 * t.pixel_size,
                t.origin_y - row0 as f64 * t.pixel_size,
                t.pixel_size,
            ),
            self.nodata,
        )
    }

    /// Resamples onto a grid of the given resolution covering the same
    /// bounds, using bilinear interpolation.
    ///
    /// A target pixel whose four source neighbors include no-data falls back
    /// to the nearest valid neighbor; a pixel with no valid neighbor at all
    /// becomes no-data.
    pub fn resample_bilinear(&self, resolution: f64) -> Result<Raster, RasterError> {
        let bounds = self.bounds();
        let out_w = ((bounds.width() / resolution).round() as usize).max(1);
        let out_h = ((bounds.height() / resolution).round() as usize).max(1);
        let out_transform = GeoTransform::new(bounds.min_x, bounds.max_y, resolution);
        let fill = self.nodata.unwrap_or(f32::NAN);

        let mut data = vec![fill; out_w * out_h];
        for row in 0..out_h {
            let y = out_transform.pixel_center_y(row);
            for col in 0..out_w {
                let x = out_transform.pixel_center_x(col);
                data[row * out_w + col] = self.sample_bilinear(x, y).unwrap_or(fill);
            }
        }
        Raster::new(data, out_w, out_h, out_transform, self.nodata)
    }

    /// Bilinear sample at a geographic point; `None` outside the grid or
    /// where no valid neighbor exists.
    fn sample_bilinear(&self, x: f64, y: f64) -> Option<f32> {
        let t = self.transform;
        // Fractional pixel-center coordinates.
        let fx = (x - t.origin_x) / t.pixel_size - 0.5;
        let fy = (t.origin_y - y) / t.pixel_size - 0.5;
        if fx < -0.5 || fy < -0.5 || fx > self.width as f64 - 0.5 || fy > self.height as f64 - 0.5
        {
            return None;
        }

        let x0 = fx.floor().clamp(0.0, (self.width - 1) as f64) as usize;
        let y0 = fy.floor().clamp(0.0, (self.height - 1) as f64) as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let wx = (fx - x0 as f64).clamp(0.0, 1.0);
        let wy = (fy - y0 as f64).clamp(0.0, 1.0);

        let v00 = self.get(x0, y0);
        let v10 = self.get(x1, y0);
        let v01 = self.get(x0, y1);
        let v11 = self.get(x1, y1);

        let any_nodata = [v00, v10, v01, v11]
            .iter()
            .any(|v| self.is_nodata_value(*v));
        if any_nodata {
            // Nearest valid neighbor, ordered by interpolation weight.
            let mut candidates = [
                ((1.0 - wx) * (1.0 - wy), v00),
                (wx * (1.0 - wy), v10),
                ((1.0 - wx) * wy, v01),
                (wx * wy, v11),
            ];
            candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
            return candidates
                .iter()
                .map(|(_, v)| *v)
                .find(|v| !self.is_nodata_value(*v));
        }

        let value = v00 as f64 * (1.0 - wx) * (1.0 - wy)
            + v10 as f64 * wx * (1.0 - wy)
            + v01 as f64 * (1.0 - wx) * wy
            + v11 as f64 * wx * wy;
        Some(value as f32)
    }

    /// Drops border rows and columns that are entirely no-data, as
    /// introduced by service-side padding. Errors if nothing valid remains.
    pub fn trim_nodata_border(&self) -> Result<Raster, RasterError> {
        let is_row_empty =
            |row: usize| (0..self.width).all(|c| self.is_nodata_value(self.get(c, row)));
        let is_col_empty =
            |col: usize| (0..self.height).all(|r| self.is_nodata_value(self.get(col, r)));

        let mut top = 0;
        while top < self.height && is_row_empty(top) {
            top += 1;
        }
        if top == self.height {
            return Err(RasterError::AllNodata);
        }
        let mut bottom = self.height;
        while bottom > top && is_row_empty(bottom - 1) {
            bottom -= 1;
        }
        let mut left = 0;
        while left < self.width && is_col_empty(left) {
            left += 1;
        }
        let mut right = self.width;
        while right > left && is_col_empty(right - 1) {
            right -= 1;
        }

        let out_w = right - left;
        let out_h = bottom - top;
        let mut data = Vec::with_capacity(out_w * out_h);
        for row in top..bottom {
            let start = row * self.width + left;
            data.extend_from_slice(&self.data[start..start + out_w]);
        }
        let t = self.transform;
        let transform = GeoTransform::new(
            t.origin_x + left as f64 * t.pixel_size,
            t.origin_y - top as f64 * t.pixel_size,
            t.pixel_size,
        );
        Raster::new(data, out_w, out_h, transform, self.nodata)
    }

    /// Half-resolution copy used for overview pages; each output pixel
    /// averages the valid pixels of its 2x2 source block.
    pub fn downsample_half(&self) -> Raster {
        let out_w = (self.width / 2).max(1);
        let out_h = (self.height / 2).max(1);
        let fill = self.nodata.unwrap_or(f32::NAN);
        let mut data = vec![fill; out_w * out_h];
        for row in 0..out_h {
            for col in 0..out_w {
                let mut sum = 0.0f64;
                let mut n = 0u32;
                for (dr, dc) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                    let r = (row * 2 + dr).min(self.height - 1);
                    let c = (col * 2 + dc).min(self.width - 1);
                    let v = self.get(c, r);
                    if !self.is_nodata_value(v) {
                        sum += v as f64;
                        n += 1;
                    }
                }
                if n > 0 {
                    data[row * out_w + col] = (sum / f64::from(n)) as f32;
                }
            }
        }
        let t = self.transform;
        Raster {
            data,
            width: out_w,
            height: out_h,
            transform: GeoTransform::new(t.origin_x, t.origin_y, t.pixel_size * 2.0),
            nodata: self.nodata,
        }
    }
}
