use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use geo::{Centroid, Contains, Coord, MapCoords, Point, Polygon, Validation};
use geojson::GeoJson;

use crate::proj::tm35fin_to_wgs84;
use crate::{CellId, CoreError};

/// Coordinate reference system of a grid source file.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SourceCrs {
    /// Already lon/lat degrees; loaded as-is.
    Wgs84,
    /// ETRS-TM35FIN meters (EPSG:3067); reprojected at load.
    Tm35Fin,
}

impl SourceCrs {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "wgs84" | "EPSG:4326" => Some(Self::Wgs84),
            "tm35fin" | "EPSG:3067" => Some(Self::Tm35Fin),
            _ => None,
        }
    }
}

/// One grid cell: polygon geometry plus its cached centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridCell {
    pub id: CellId,
    pub polygon: Polygon<f64>,
    pub centroid: Point<f64>,
}

impl GridCell {
    /// Build a cell, computing the centroid once. Returns `None` for
    /// degenerate geometry without a centroid.
    #[must_use]
    pub fn new(id: CellId, polygon: Polygon<f64>) -> Option<Self> {
        let centroid = polygon.centroid()?;
        Some(Self { id, polygon, centroid })
    }
}

/// Immutable in-memory grid table, loaded once at startup and shared
/// read-only by everything else.
#[derive(Debug, Clone)]
pub struct GridStore {
    cells: Vec<GridCell>,
    index: BTreeMap<CellId, usize>,
}

impl GridStore {
    /// # Errors
    /// Returns [`CoreError::Validation`] when two cells share an id.
    pub fn from_cells(cells: Vec<GridCell>) -> Result<Self, CoreError> {
        let mut index = BTreeMap::new();
        for (position, cell) in cells.iter().enumerate() {
            if index.insert(cell.id, position).is_some() {
                return Err(CoreError::Validation(format!(
                    "duplicate grid cell id: {}",
                    cell.id
                )));
            }
        }
        Ok(Self { cells, index })
    }

    #[must_use]
    pub fn get(&self, id: CellId) -> Option<&GridCell> {
        self.index.get(&id).map(|position| &self.cells[*position])
    }

    #[must_use]
    pub fn contains_id(&self, id: CellId) -> bool {
        self.index.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GridCell> {
        self.cells.iter()
    }

    /// Cells present in both the store and the given id set. Ids the grid
    /// does not know are silently dropped (a lookup miss, not an error).
    #[must_use]
    pub fn filter(&self, ids: &BTreeSet<CellId>) -> Vec<&GridCell> {
        ids.iter().filter_map(|id| self.get(*id)).collect()
    }

    /// Containing cell for a lon/lat point, if the point is inside the
    /// grid's coverage.
    #[must_use]
    pub fn locate(&self, point: Point<f64>) -> Option<CellId> {
        self.cells
            .iter()
            .find(|cell| cell.polygon.contains(&point))
            .map(|cell| cell.id)
    }

    /// Mean of cell centroids, used as the default map center.
    #[must_use]
    pub fn map_center(&self) -> Option<Point<f64>> {
        if self.cells.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let count = self.cells.len() as f64;
        let (sum_x, sum_y) = self.iter().fold((0.0_f64, 0.0_f64), |(x, y), cell| {
            (x + cell.centroid.x(), y + cell.centroid.y())
        });
        Some(Point::new(sum_x / count, sum_y / count))
    }
}

/// Load a grid store from a GeoJSON FeatureCollection with an integer
/// `id` property per polygon feature.
///
/// Invalid geometries are dropped with a warning, matching the source
/// data which carries a handful of degenerate cells.
///
/// # Errors
/// Returns [`CoreError::Io`] when the file cannot be read and
/// [`CoreError::Parse`] when it is not a feature collection of polygons
/// with integer ids.
pub fn load_grid(path: &Path, crs: SourceCrs) -> Result<GridStore, CoreError> {
    let body = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let geojson: GeoJson = body.parse().map_err(|err| CoreError::Parse {
        path: path.display().to_string(),
        detail: format!("not valid GeoJSON: {err}"),
    })?;

    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(CoreError::Parse {
            path: path.display().to_string(),
            detail: "expected a FeatureCollection".to_string(),
        });
    };

    let mut cells = Vec::with_capacity(collection.features.len());
    let mut skipped = 0_usize;

    for feature in collection.features {
        let id = feature
            .properties
            .as_ref()
            .and_then(|properties| properties.get("id"))
            .and_then(serde_json::Value::as_i64)
            .map(CellId)
            .ok_or_else(|| CoreError::Parse {
                path: path.display().to_string(),
                detail: "feature is missing an integer `id` property".to_string(),
            })?;

        let Some(geometry) = feature.geometry else {
            skipped += 1;
            continue;
        };

        let geometry = geo::Geometry::<f64>::try_from(geometry.value).map_err(|err| {
            CoreError::Parse {
                path: path.display().to_string(),
                detail: format!("cell {id} has unusable geometry: {err}"),
            }
        })?;

        let polygon = match geometry {
            geo::Geometry::Polygon(polygon) => polygon,
            geo::Geometry::MultiPolygon(multi) => match multi.into_iter().next() {
                Some(polygon) => polygon,
                None => {
                    skipped += 1;
                    continue;
                }
            },
            _ => {
                return Err(CoreError::Parse {
                    path: path.display().to_string(),
                    detail: format!("cell {id} is not a polygon"),
                })
            }
        };

        let polygon = match crs {
            SourceCrs::Wgs84 => polygon,
            SourceCrs::Tm35Fin => polygon.map_coords(|Coord { x, y }| {
                let (lon, lat) = tm35fin_to_wgs84(x, y);
                Coord { x: lon, y: lat }
            }),
        };

        if !polygon.is_valid() {
            tracing::warn!(cell = %id, "dropping invalid grid geometry");
            skipped += 1;
            continue;
        }

        match GridCell::new(id, polygon) {
            Some(cell) => cells.push(cell),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::warn!(skipped, "skipped grid features without usable geometry");
    }

    GridStore::from_cells(cells)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    pub(crate) fn square(id: i64, x0: f64, y0: f64, side: f64) -> GridCell {
        let polygon = Polygon::new(
            vec![
                (x0, y0),
                (x0 + side, y0),
                (x0 + side, y0 + side),
                (x0, y0 + side),
                (x0, y0),
            ]
            .into(),
            vec![],
        );
        match GridCell::new(CellId(id), polygon) {
            Some(cell) => cell,
            None => panic!("square fixture should have a centroid"),
        }
    }

    fn fixture_store() -> GridStore {
        let cells = vec![
            square(1, 0.0, 0.0, 1.0),
            square(2, 1.0, 0.0, 1.0),
            square(3, 0.0, 1.0, 1.0),
        ];
        match GridStore::from_cells(cells) {
            Ok(store) => store,
            Err(err) => panic!("fixture grid should build: {err}"),
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let cells = vec![square(7, 0.0, 0.0, 1.0), square(7, 1.0, 0.0, 1.0)];
        assert!(GridStore::from_cells(cells).is_err());
    }

    #[test]
    fn locate_finds_the_containing_cell() {
        let store = fixture_store();
        assert_eq!(store.locate(Point::new(0.5, 0.5)), Some(CellId(1)));
        assert_eq!(store.locate(Point::new(1.5, 0.5)), Some(CellId(2)));
        assert_eq!(store.locate(Point::new(5.0, 5.0)), None);
    }

    #[test]
    fn filter_drops_unknown_ids_silently() {
        let store = fixture_store();
        let wanted: BTreeSet<CellId> =
            [CellId(2), CellId(3), CellId(99)].into_iter().collect();
        let cells = store.filter(&wanted);
        let ids: Vec<CellId> = cells.iter().map(|cell| cell.id).collect();
        assert_eq!(ids, vec![CellId(2), CellId(3)]);
    }

    #[test]
    fn map_center_is_the_mean_of_cell_centroids() {
        let store = fixture_store();
        // Centroids are (0.5, 0.5), (1.5, 0.5), (0.5, 1.5).
        let center = match store.map_center() {
            Some(center) => center,
            None => panic!("non-empty grid should have a map center"),
        };
        assert!((center.x() - 5.0 / 6.0).abs() < 1e-9);
        assert!((center.y() - 5.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn map_center_of_an_empty_store_is_none() {
        let store = match GridStore::from_cells(Vec::new()) {
            Ok(store) => store,
            Err(err) => panic!("empty grid should build: {err}"),
        };
        assert_eq!(store.map_center(), None);
    }

    #[test]
    fn iter_yields_cells_in_insertion_order() {
        let store = fixture_store();
        let ids: Vec<CellId> = store.iter().map(|cell| cell.id).collect();
        assert_eq!(ids, vec![CellId(1), CellId(2), CellId(3)]);
    }

    #[test]
    fn centroids_are_cached_at_construction() {
        let store = fixture_store();
        let cell = match store.get(CellId(1)) {
            Some(cell) => cell,
            None => panic!("cell 1 should exist"),
        };
        assert!((cell.centroid.x() - 0.5).abs() < 1e-9);
        assert!((cell.centroid.y() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn load_grid_reads_features_and_drops_invalid_geometry() {
        let geojson = r#"{
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {"id": 10},
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]
                    }
                },
                {
                    "type": "Feature",
                    "properties": {"id": 11},
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[0,0],[1,1],[1,0],[0,1],[0,0]]]
                    }
                }
            ]
        }"#;

        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(err) => panic!("tempdir should create: {err}"),
        };
        let path = dir.path().join("grid.geojson");
        let mut file = match std::fs::File::create(&path) {
            Ok(file) => file,
            Err(err) => panic!("fixture file should create: {err}"),
        };
        if let Err(err) = file.write_all(geojson.as_bytes()) {
            panic!("fixture file should write: {err}");
        }

        let store = match load_grid(&path, SourceCrs::Wgs84) {
            Ok(store) => store,
            Err(err) => panic!("grid should load: {err}"),
        };

        // The bowtie polygon (id 11) is self-intersecting and dropped.
        assert_eq!(store.len(), 1);
        assert!(store.contains_id(CellId(10)));
        assert!(!store.contains_id(CellId(11)));
    }

    #[test]
    fn load_grid_rejects_features_without_ids() {
        let geojson = r#"{
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {},
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]
                    }
                }
            ]
        }"#;

        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(err) => panic!("tempdir should create: {err}"),
        };
        let path = dir.path().join("grid.geojson");
        if let Err(err) = std::fs::write(&path, geojson) {
            panic!("fixture file should write: {err}");
        }

        assert!(load_grid(&path, SourceCrs::Wgs84).is_err());
    }
}
