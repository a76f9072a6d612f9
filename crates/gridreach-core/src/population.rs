use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::{CellId, CoreError};

/// Default name of the resident-count column in the population CSV.
pub const DEFAULT_POPULATION_COLUMN: &str = "population";

/// Immutable cell id to resident count table. Cells without a row count
/// as zero; that is data coverage, not an error.
#[derive(Debug, Clone, Default)]
pub struct PopulationStore {
    by_cell: BTreeMap<CellId, u64>,
}

impl PopulationStore {
    #[must_use]
    pub fn from_rows(rows: Vec<(CellId, u64)>) -> Self {
        Self {
            by_cell: rows.into_iter().collect(),
        }
    }

    /// Load from a CSV file with an `id` column and a resident-count
    /// column named `population_column`.
    ///
    /// # Errors
    /// Returns [`CoreError::Io`] / [`CoreError::Parse`] when the file
    /// cannot be read, the columns are missing, or values are malformed.
    pub fn load(path: &Path, population_column: &str) -> Result<Self, CoreError> {
        let mut reader = csv::Reader::from_path(path).map_err(|err| match err.kind() {
            csv::ErrorKind::Io(_) => CoreError::Io {
                path: path.display().to_string(),
                source: std::io::Error::other(err.to_string()),
            },
            _ => CoreError::Parse {
                path: path.display().to_string(),
                detail: err.to_string(),
            },
        })?;

        let headers = reader
            .headers()
            .map_err(|err| CoreError::Parse {
                path: path.display().to_string(),
                detail: err.to_string(),
            })?
            .clone();

        let id_index = column_index(&headers, "id").ok_or_else(|| CoreError::Parse {
            path: path.display().to_string(),
            detail: "population file has no `id` column".to_string(),
        })?;
        let population_index =
            column_index(&headers, population_column).ok_or_else(|| CoreError::Parse {
                path: path.display().to_string(),
                detail: format!("population file has no `{population_column}` column"),
            })?;

        let mut by_cell = BTreeMap::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|err| CoreError::Parse {
                path: path.display().to_string(),
                detail: format!("row {}: {err}", line + 2),
            })?;

            let id: CellId = record
                .get(id_index)
                .unwrap_or_default()
                .parse()
                .map_err(|_| CoreError::Parse {
                    path: path.display().to_string(),
                    detail: format!("row {}: malformed id", line + 2),
                })?;
            let population = record
                .get(population_index)
                .unwrap_or_default()
                .trim()
                .parse::<u64>()
                .map_err(|_| CoreError::Parse {
                    path: path.display().to_string(),
                    detail: format!("row {}: malformed resident count", line + 2),
                })?;

            by_cell.insert(id, population);
        }

        Ok(Self { by_cell })
    }

    #[must_use]
    pub fn get(&self, id: CellId) -> u64 {
        self.by_cell.get(&id).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_cell.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_cell.is_empty()
    }

    /// Total residents across a destination set. Ids with no row
    /// contribute zero; the empty set sums to zero.
    #[must_use]
    pub fn population_of(&self, ids: &BTreeSet<CellId>) -> u64 {
        ids.iter().map(|id| self.get(*id)).sum()
    }
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|header| header.trim() == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_sums_to_zero() {
        let store = PopulationStore::from_rows(vec![(CellId(1), 50)]);
        assert_eq!(store.population_of(&BTreeSet::new()), 0);
    }

    #[test]
    fn absent_ids_contribute_zero() {
        let store = PopulationStore::from_rows(vec![(CellId(1), 50), (CellId(2), 7)]);
        let ids: BTreeSet<CellId> = [CellId(1), CellId(2), CellId(3)].into_iter().collect();
        assert_eq!(store.population_of(&ids), 57);
    }

    #[test]
    fn set_input_makes_duplicates_impossible() {
        // Duplicate-insensitivity holds by construction: inserting the
        // same id twice leaves a single set element.
        let mut ids = BTreeSet::new();
        ids.insert(CellId(1));
        ids.insert(CellId(1));
        let store = PopulationStore::from_rows(vec![(CellId(1), 10)]);
        assert_eq!(store.population_of(&ids), 10);
    }

    #[test]
    fn load_reads_named_columns() {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(err) => panic!("tempdir should create: {err}"),
        };
        let path = dir.path().join("pop.csv");
        if let Err(err) = std::fs::write(&path, "id,residents\n1,100\n2,0\n3,250\n") {
            panic!("fixture should write: {err}");
        }

        let store = match PopulationStore::load(&path, "residents") {
            Ok(store) => store,
            Err(err) => panic!("population should load: {err}"),
        };

        assert_eq!(store.len(), 3);
        assert_eq!(store.get(CellId(3)), 250);
        assert_eq!(store.get(CellId(4)), 0);
    }

    #[test]
    fn load_rejects_missing_count_column() {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(err) => panic!("tempdir should create: {err}"),
        };
        let path = dir.path().join("pop.csv");
        if let Err(err) = std::fs::write(&path, "id,other\n1,100\n") {
            panic!("fixture should write: {err}");
        }

        assert!(PopulationStore::load(&path, "residents").is_err());
    }
}
