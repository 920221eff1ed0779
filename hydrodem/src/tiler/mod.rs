//! Region tiling.
//!
//! Partitions a watershed region into a fishnet of service-size-bounded
//! cells, applies edge-aware overlap buffering, and clips each buffered
//! cell against the region boundary. Internal neighbors end up sharing
//! `2 × edge_buffer` of overlap so later resampling at tile boundaries has
//! valid neighboring context; the outer hull of the tiled grid never
//! overshoots the region bounds.

use geo::{coord, Area, BooleanOps, BoundingRect, MultiPolygon, Rect, Validation};
use serde_json::{json, Map};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::config::Crs;
use crate::region::Region;

/// Errors raised during tile generation.
#[derive(Debug, Error)]
pub enum TilerError {
    #[error("max_tile_size must be positive, got {0}")]
    InvalidTileSize(f64),

    #[error("edge_buffer {buffer} must be non-negative and smaller than half the tile size {size}")]
    InvalidBuffer { buffer: f64, size: f64 },

    #[error("region '{0}' has an empty geometry")]
    EmptyRegion(String),

    #[error("failed to read tile file {path}: {message}")]
    TileFile { path: String, message: String },
}

/// Which sides of a grid cell lie on the overall region bounds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EdgeFlags {
    pub min_x: bool,
    pub max_x: bool,
    pub min_y: bool,
    pub max_y: bool,
}

/// One overlap-buffered, region-clipped acquisition cell.
#[derive(Clone, Debug)]
pub struct Tile {
    id: String,
    region_id: String,
    geometry: MultiPolygon<f64>,
    edges: EdgeFlags,
}

impl Tile {
    /// Unique tile identifier (hyphen-less UUID hex).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identifier of the parent region.
    pub fn region_id(&self) -> &str {
        &self.region_id
    }

    /// Clipped tile geometry.
    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    /// Edge position of the originating grid cell.
    pub fn edges(&self) -> EdgeFlags {
        self.edges
    }

    /// Axis-aligned bounds of the tile geometry.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.geometry.bounding_rect()
    }
}

/// Fishnet tile generator.
///
/// `max_tile_size` bounds the cell edge length (derived by the caller from
/// the acquisition service's pixel limit, see
/// [`crate::config::PipelineConfig::max_tile_size`]); `edge_buffer` is the
/// one-sided overlap applied between internal neighbors.
#[derive(Clone, Debug)]
pub struct TileGenerator {
    max_tile_size: f64,
    edge_buffer: f64,
}

impl TileGenerator {
    /// Creates a generator, validating the sizing parameters.
    pub fn new(max_tile_size: f64, edge_buffer: f64) -> Result<Self, TilerError> {
        if !(max_tile_size > 0.0) {
            return Err(TilerError::InvalidTileSize(max_tile_size));
        }
        if edge_buffer < 0.0 || edge_buffer >= max_tile_size / 2.0 {
            return Err(TilerError::InvalidBuffer {
                buffer: edge_buffer,
                size: max_tile_size,
            });
        }
        Ok(Self {
            max_tile_size,
            edge_buffer,
        })
    }

    /// Partitions a region into buffered, clipped tiles.
    ///
    /// Degenerate intersection results (empty, invalid, or non-area) are
    /// discarded, never yielded.
    pub fn generate(&self, region: &Region) -> Result<Vec<Tile>, TilerError> {
        let bounds = region
            .geometry()
            .bounding_rect()
            .ok_or_else(|| TilerError::EmptyRegion(region.id().to_string()))?;

        let (nx, ny, cell_w, cell_h) = fishnet_dimensions(&bounds, self.max_tile_size);
        debug!(
            region = region.id(),
            nx, ny, cell_w, cell_h, "generated fishnet grid"
        );

        let mut tiles = Vec::new();
        for i in 0..nx {
            for j in 0..ny {
                let edges = EdgeFlags {
                    min_x: i == 0,
                    max_x: i == nx - 1,
                    min_y: j == 0,
                    max_y: j == ny - 1,
                };
                let cell = buffered_cell(&bounds, i, j, cell_w, cell_h, edges, self.edge_buffer);

                let clipped = region
                    .geometry()
                    .intersection(&MultiPolygon::new(vec![cell.to_polygon()]));

                // An intersection that collapses to a line or point comes
                // back as an empty or zero-area multipolygon.
                if clipped.0.is_empty()
                    || clipped.unsigned_area() <= 0.0
                    || !clipped.is_valid()
                {
                    continue;
                }

                tiles.push(Tile {
                    id: Uuid::new_v4().simple().to_string(),
                    region_id: region.id().to_string(),
                    geometry: clipped,
                    edges,
                });
            }
        }
        Ok(tiles)
    }
}

/// Grid dimensions for a bounding box: cell counts and the recomputed
/// (even) cell size. Interior cells are equal-sized; the size comes from
/// the grid-line spacing, not from `max_tile_size` itself.
fn fishnet_dimensions(bounds: &Rect<f64>, max_tile_size: f64) -> (usize, usize, f64, f64) {
    let dx = bounds.width();
    let dy = bounds.height();
    let nx = (dx / max_tile_size).ceil().max(1.0) as usize;
    let ny = (dy / max_tile_size).ceil().max(1.0) as usize;
    (nx, ny, dx / nx as f64, dy / ny as f64)
}

/// One buffered fishnet cell.
///
/// Buffering is asymmetric: a side on the maximum region boundary extends
/// only the opposite side inward; a side on the minimum boundary extends
/// only the opposite side outward; interior sides extend both ways. Both
/// branches together keep the outer hull inside the region bounds while
/// giving every internal shared edge `2 × edge_buffer` of overlap.
fn buffered_cell(
    bounds: &Rect<f64>,
    i: usize,
    j: usize,
    cell_w: f64,
    cell_h: f64,
    edges: EdgeFlags,
    buffer: f64,
) -> Rect<f64> {
    let mut x0 = bounds.min().x + i as f64 * cell_w;
    let mut x1 = x0 + cell_w;
    let mut y0 = bounds.min().y + j as f64 * cell_h;
    let mut y1 = y0 + cell_h;

    if edges.max_x {
        x0 -= buffer;
    } else if edges.min_x {
        x1 += buffer;
    } else {
        x0 -= buffer;
        x1 += buffer;
    }

    if edges.max_y {
        y0 -= buffer;
    } else if edges.min_y {
        y1 += buffer;
    } else {
        y0 -= buffer;
        y1 += buffer;
    }

    Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 })
}

/// Saves generated tiles as a GeoJSON FeatureCollection so tiling and
/// acquisition can run as separate steps.
pub fn save_tiles(path: &std::path::Path, tiles: &[Tile]) -> Result<(), TilerError> {
    let features: Vec<geojson::Feature> = tiles
        .iter()
        .map(|tile| {
            let mut properties = Map::new();
            properties.insert("idx".to_string(), json!(tile.id()));
            properties.insert("huc".to_string(), json!(tile.region_id()));
            geojson::Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::from(
                    tile.geometry(),
                ))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    let collection = geojson::FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };
    std::fs::write(path, geojson::GeoJson::from(collection).to_string()).map_err(|e| {
        TilerError::TileFile {
            path: path.display().to_string(),
            message: e.to_string(),
        }
    })
}

/// Loads tiles previously written by [`save_tiles`].
///
/// Edge flags are not persisted; the buffering they describe is already
/// baked into the stored geometries.
pub fn load_tiles(path: &std::path::Path) -> Result<Vec<Tile>, TilerError> {
    let file_err = |message: String| TilerError::TileFile {
        path: path.display().to_string(),
        message,
    };

    let text = std::fs::read_to_string(path).map_err(|e| file_err(e.to_string()))?;
    let geojson: geojson::GeoJson = text.parse().map_err(|e: geojson::Error| file_err(e.to_string()))?;
    let collection =
        geojson::FeatureCollection::try_from(geojson).map_err(|e| file_err(e.to_string()))?;

    let mut tiles = Vec::with_capacity(collection.features.len());
    for (index, feature) in collection.features.into_iter().enumerate() {
        let get_prop = |key: &str| {
            feature
                .properties
                .as_ref()
                .and_then(|p| p.get(key))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        let id = get_prop("idx")
            .ok_or_else(|| file_err(format!("feature {index} missing 'idx' property")))?;
        let region_id = get_prop("huc")
            .ok_or_else(|| file_err(format!("feature {index} missing 'huc' property")))?;
        let geometry = feature
            .geometry
            .ok_or_else(|| file_err(format!("feature {index} missing geometry")))?;
        let geometry: geo::Geometry<f64> = geometry
            .try_into()
            .map_err(|_| file_err(format!("feature {index} has non-area geometry")))?;
        let geometry = match geometry {
            geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
            geo::Geometry::MultiPolygon(mp) => mp,
            _ => return Err(file_err(format!("feature {index} has non-area geometry"))),
        };
        tiles.push(Tile {
            id,
            region_id,
            geometry,
            edges: EdgeFlags::default(),
        });
    }
    Ok(tiles)
}

/// Builds an in-memory region for tests and examples.
#[cfg(test)]
pub(crate) fn rect_region(id: &str, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Region {
    let rect = Rect::new(coord! { x: min_x, y: min_y }, coord! { x: max_x, y: max_y });
    Region::new(
        id,
        MultiPolygon::new(vec![rect.to_polygon()]),
        Crs::epsg(5070),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::polygon;
    use proptest::prelude::*;

    const BUFFER: f64 = 20.0;

    fn generate_square(region_size: f64, max_tile_size: f64) -> Vec<Tile> {
        let region = rect_region("12090301", 0.0, 0.0, region_size, region_size);
        TileGenerator::new(max_tile_size, BUFFER)
            .unwrap()
            .generate(&region)
            .unwrap()
    }

    #[test]
    fn test_new_rejects_bad_parameters() {
        assert!(matches!(
            TileGenerator::new(0.0, 1.0),
            Err(TilerError::InvalidTileSize(_))
        ));
        assert!(matches!(
            TileGenerator::new(100.0, 60.0),
            Err(TilerError::InvalidBuffer { .. })
        ));
        assert!(matches!(
            TileGenerator::new(100.0, -1.0),
            Err(TilerError::InvalidBuffer { .. })
        ));
    }

    #[test]
    fn test_10000_square_with_4000_tiles_yields_3x3() {
        // ceil(10000/4000) = 3 cells per axis.
        let tiles = generate_square(10_000.0, 4_000.0);
        assert_eq!(tiles.len(), 9);
    }

    #[test]
    fn test_single_cell_region() {
        let tiles = generate_square(1_000.0, 4_000.0);
        assert_eq!(tiles.len(), 1);
        let tile = &tiles[0];
        assert_eq!(
            tile.edges(),
            EdgeFlags {
                min_x: true,
                max_x: true,
                min_y: true,
                max_y: true
            }
        );
    }

    #[test]
    fn test_tiles_never_overshoot_region_bounds() {
        for tile in generate_square(10_000.0, 4_000.0) {
            let b = tile.bounds().unwrap();
            assert!(b.min().x >= 0.0 - 1e-9);
            assert!(b.min().y >= 0.0 - 1e-9);
            assert!(b.max().x <= 10_000.0 + 1e-9);
            assert!(b.max().y <= 10_000.0 + 1e-9);
        }
    }

    #[test]
    fn test_internal_neighbors_overlap_by_twice_the_buffer() {
        let tiles = generate_square(10_000.0, 4_000.0);
        // With a square region fully covering its bounding box, every tile
        // keeps its buffered rectangular shape; measure the x-overlap of
        // two horizontally adjacent interior-edge tiles.
        let cell = 10_000.0 / 3.0;
        let left = tiles
            .iter()
            .find(|t| t.edges().min_x && !t.edges().min_y && !t.edges().max_y)
            .unwrap();
        let middle = tiles
            .iter()
            .find(|t| !t.edges().min_x && !t.edges().max_x && !t.edges().min_y && !t.edges().max_y)
            .unwrap();

        let left_bounds = left.bounds().unwrap();
        let middle_bounds = middle.bounds().unwrap();
        // Left tile extends one buffer past the first grid line; the middle
        // tile starts one buffer before it. The boolean clip perturbs
        // coordinates at the 1e-6 level, so compare against that.
        assert_relative_eq!(left_bounds.max().x, cell + BUFFER, epsilon = 1e-4);
        assert_relative_eq!(middle_bounds.min().x, cell - BUFFER, epsilon = 1e-4);
        assert_relative_eq!(
            left_bounds.max().x - middle_bounds.min().x,
            2.0 * BUFFER,
            epsilon = 1e-4
        );
    }

    #[test]
    fn test_irregular_region_discards_empty_cells() {
        // An L-shaped region whose arms stop at 3900, a full buffer short
        // of the top-right cell even after its interior sides extend
        // outward (to 3980); that cell's intersection is empty.
        let l_shape = polygon![
            (x: 0.0, y: 0.0),
            (x: 8_000.0, y: 0.0),
            (x: 8_000.0, y: 3_900.0),
            (x: 3_900.0, y: 3_900.0),
            (x: 3_900.0, y: 8_000.0),
            (x: 0.0, y: 8_000.0),
        ];
        let region = Region::new(
            "17060108",
            MultiPolygon::new(vec![l_shape]),
            Crs::epsg(5070),
        );
        let tiles = TileGenerator::new(4_000.0, BUFFER)
            .unwrap()
            .generate(&region)
            .unwrap();
        // 2x2 fishnet minus the top-right cell.
        assert_eq!(tiles.len(), 3);
        for tile in &tiles {
            assert!(tile.geometry().unsigned_area() > 0.0);
        }
    }

    #[test]
    fn test_tile_ids_are_unique_and_hyphenless() {
        let tiles = generate_square(10_000.0, 4_000.0);
        let mut ids: Vec<&str> = tiles.iter().map(Tile::id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), tiles.len());
        assert!(ids.iter().all(|id| !id.contains('-') && id.len() == 32));
    }

    #[test]
    fn test_save_and_load_tiles_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiles.geojson");
        let tiles = generate_square(10_000.0, 4_000.0);

        save_tiles(&path, &tiles).unwrap();
        let loaded = load_tiles(&path).unwrap();

        assert_eq!(loaded.len(), tiles.len());
        assert_eq!(loaded[0].id(), tiles[0].id());
        assert_eq!(loaded[0].region_id(), "12090301");
        assert_relative_eq!(
            loaded[0].geometry().unsigned_area(),
            tiles[0].geometry().unsigned_area(),
            epsilon = 1e-6
        );
    }

    proptest! {
        /// The un-buffered fishnet partitions the bounding box: cell areas
        /// sum to the box area and every cell respects the size cap.
        #[test]
        fn prop_fishnet_partitions_bounding_box(
            width in 100.0f64..50_000.0,
            height in 100.0f64..50_000.0,
            max_tile in 500.0f64..10_000.0,
        ) {
            let bounds = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: width, y: height });
            let (nx, ny, cell_w, cell_h) = fishnet_dimensions(&bounds, max_tile);

            prop_assert!(cell_w <= max_tile + 1e-9);
            prop_assert!(cell_h <= max_tile + 1e-9);
            let total = (nx as f64 * cell_w) * (ny as f64 * cell_h);
            prop_assert!((total - width * height).abs() < 1e-4 * width * height);
        }

        /// Buffered cells never overshoot the region bounds on a boundary
        /// side, for arbitrary grid shapes.
        #[test]
        fn prop_buffered_cells_stay_inside_bounds(
            width in 1_000.0f64..30_000.0,
            height in 1_000.0f64..30_000.0,
            max_tile in 900.0f64..8_000.0,
            buffer in 0.0f64..100.0,
        ) {
            let bounds = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: width, y: height });
            let (nx, ny, cell_w, cell_h) = fishnet_dimensions(&bounds, max_tile);
            for i in 0..nx {
                for j in 0..ny {
                    let edges = EdgeFlags {
                        min_x: i == 0,
                        max_x: i == nx - 1,
                        min_y: j == 0,
                        max_y: j == ny - 1,
                    };
                    let cell = buffered_cell(&bounds, i, j, cell_w, cell_h, edges, buffer);
                    if edges.max_x {
                        prop_assert!(cell.max().x <= width + 1e-9);
                    }
                    if edges.max_y {
                        prop_assert!(cell.max().y <= height + 1e-9);
                    }
                    // A min-boundary side stays pinned unless the cell is
                    // also on the max boundary of the same axis.
                    if edges.min_x && !edges.max_x {
                        prop_assert!(cell.min().x >= -1e-9);
                    }
                    if edges.min_y && !edges.max_y {
                        prop_assert!(cell.min().y >= -1e-9);
                    }
                }
            }
        }
    }
}
