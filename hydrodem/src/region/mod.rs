//! Watershed region geometries.
//!
//! A [`Region`] pairs a watershed boundary polygon with its HUC identifier
//! and CRS. Regions arrive either from a GeoJSON boundary file or directly
//! in memory; the [`RegionSource`] sum type resolves that choice exactly
//! once at the pipeline boundary.
//!
//! Region geometries are expected to be pre-buffered by the boundary
//! provider (the watershed buffer is applied upstream, in CRS units), so
//! the tiler receives them as-is.

use std::path::{Path, PathBuf};

use geo::{Geometry, MultiPolygon};
use geojson::{FeatureCollection, GeoJson};
use thiserror::Error;
use tracing::debug;

use crate::config::Crs;

/// Default feature property naming the watershed code.
pub const DEFAULT_ID_PROPERTY: &str = "huc";

/// Errors raised while resolving regions.
#[derive(Debug, Error)]
pub enum RegionError {
    #[error("failed to read region file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid GeoJSON in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("feature {index} has no usable geometry")]
    MissingGeometry { index: usize },

    #[error("feature {index} has no '{property}' property")]
    MissingId { index: usize, property: String },

    #[error("no regions found in {path}")]
    Empty { path: PathBuf },
}

/// A watershed region: boundary polygon, HUC code, and CRS.
///
/// Immutable once constructed.
#[derive(Clone, Debug)]
pub struct Region {
    id: String,
    geometry: MultiPolygon<f64>,
    crs: Crs,
}

impl Region {
    /// Creates a region from an in-memory geometry.
    pub fn new(id: impl Into<String>, geometry: MultiPolygon<f64>, crs: Crs) -> Self {
        Self {
            id: id.into(),
            geometry,
            crs,
        }
    }

    /// Watershed code (e.g. an 8-digit HUC).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Boundary geometry.
    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    /// Coordinate reference system of the geometry.
    pub fn crs(&self) -> &Crs {
        &self.crs
    }
}

/// Where region geometries come from, resolved once at the boundary.
#[derive(Clone, Debug)]
pub enum RegionSource {
    /// A GeoJSON boundary file on disk.
    Path(PathBuf),
    /// Regions already held in memory.
    InMemory(Vec<Region>),
}

impl RegionSource {
    /// Resolves the source into concrete regions.
    ///
    /// For [`RegionSource::Path`], every feature in the file becomes one
    /// region keyed by `id_property`; the file CRS is taken to be `crs`
    /// (GeoJSON itself does not carry projected CRS metadata).
    pub fn resolve(self, id_property: &str, crs: &Crs) -> Result<Vec<Region>, RegionError> {
        match self {
            RegionSource::InMemory(regions) => Ok(regions),
            RegionSource::Path(path) => load_regions(&path, id_property, crs),
        }
    }
}

/// Loads regions from a GeoJSON FeatureCollection file.
pub fn load_regions(
    path: &Path,
    id_property: &str,
    crs: &Crs,
) -> Result<Vec<Region>, RegionError> {
    let text = std::fs::read_to_string(path).map_err(|source| RegionError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let geojson: GeoJson = text.parse().map_err(|e: geojson::Error| RegionError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let collection = FeatureCollection::try_from(geojson).map_err(|e| RegionError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut regions = Vec::with_capacity(collection.features.len());
    for (index, feature) in collection.features.into_iter().enumerate() {
        let id = feature
            .properties
            .as_ref()
            .and_then(|props| props.get(id_property))
            .and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| RegionError::MissingId {
                index,
                property: id_property.to_string(),
            })?;

        let geometry = feature
            .geometry
            .ok_or(RegionError::MissingGeometry { index })?;
        let geometry: Geometry<f64> = geometry
            .try_into()
            .map_err(|_| RegionError::MissingGeometry { index })?;
        let multipolygon = match geometry {
            Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
            Geometry::MultiPolygon(mp) => mp,
            _ => return Err(RegionError::MissingGeometry { index }),
        };

        debug!(region = %id, "loaded region boundary");
        regions.push(Region::new(id, multipolygon, crs.clone()));
    }

    if regions.is_empty() {
        return Err(RegionError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(regions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE_GEOJSON: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": { "huc": "12090301" },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0], [0.0, 0.0]]]
                }
            },
            {
                "type": "Feature",
                "properties": { "huc": 12090302 },
                "geometry": {
                    "type": "MultiPolygon",
                    "coordinates": [[[[200.0, 0.0], [300.0, 0.0], [300.0, 100.0], [200.0, 100.0], [200.0, 0.0]]]]
                }
            }
        ]
    }"#;

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_regions_from_geojson() {
        let file = write_temp(SAMPLE_GEOJSON);
        let regions = load_regions(file.path(), "huc", &Crs::epsg(5070)).unwrap();

        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].id(), "12090301");
        // Numeric ids are stringified.
        assert_eq!(regions[1].id(), "12090302");
        assert_eq!(regions[0].crs(), &Crs::epsg(5070));
        assert_eq!(regions[0].geometry().0.len(), 1);
    }

    #[test]
    fn test_load_regions_missing_id_property() {
        let file = write_temp(SAMPLE_GEOJSON);
        let result = load_regions(file.path(), "basin", &Crs::epsg(5070));
        assert!(matches!(result, Err(RegionError::MissingId { .. })));
    }

    #[test]
    fn test_load_regions_invalid_json() {
        let file = write_temp("not geojson at all");
        let result = load_regions(file.path(), "huc", &Crs::epsg(5070));
        assert!(matches!(result, Err(RegionError::Parse { .. })));
    }

    #[test]
    fn test_load_regions_empty_collection() {
        let file = write_temp(r#"{"type": "FeatureCollection", "features": []}"#);
        let result = load_regions(file.path(), "huc", &Crs::epsg(5070));
        assert!(matches!(result, Err(RegionError::Empty { .. })));
    }

    #[test]
    fn test_region_source_in_memory_passthrough() {
        let region = Region::new(
            "01010101",
            MultiPolygon::new(vec![]),
            Crs::epsg(5070),
        );
        let source = RegionSource::InMemory(vec![region]);
        let regions = source.resolve("huc", &Crs::epsg(5070)).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].id(), "01010101");
    }
}
