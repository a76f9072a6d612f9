use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

use gridreach_core::{CellId, Mode};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

const TABLE: &str = "travel_times";

/// Failures of the travel-time lookup layer.
///
/// `Unavailable` is the retryable infrastructure case ("query
/// unavailable") and is deliberately distinct from an empty result,
/// which is a normal outcome reported as an empty set.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("travel-time store unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),
    #[error("matrix import failed for {path}: {detail}")]
    Import { path: String, detail: String },
    #[error("failed to read matrix directory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Travel-time and distance attributes for one (from, to) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PairTimes {
    pub from: CellId,
    pub to: CellId,
    /// Walking distance in meters; `None` when the source has no route.
    pub walk_distance_m: Option<f64>,
    /// Minutes per mode; `None` where the matrix marks the pair unreachable.
    pub minutes: BTreeMap<Mode, Option<f64>>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct ImportSummary {
    pub files: usize,
    pub rows: usize,
    pub skipped_rows: usize,
}

/// SQLite-backed travel-time matrix, read-only at query time.
pub struct TravelTimeStore {
    conn: Connection,
}

impl TravelTimeStore {
    /// Open (or create) the matrix database with the standard pragmas.
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] when the database cannot be
    /// opened or configured.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(Self { conn })
    }

    /// In-memory store for tests and ad-hoc use.
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] when SQLite cannot allocate it.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Create the matrix table and its origin index.
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] on DDL failure.
    pub fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(&schema_sql())?;
        Ok(())
    }

    /// Destinations reachable from `origin` within `threshold_minutes`
    /// (inclusive) under `mode`.
    ///
    /// Zero or negative thresholds are valid and simply produce small or
    /// empty sets. An origin with no outgoing rows yields the empty set.
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] when the lookup layer fails.
    pub fn reachable(
        &self,
        mode: Mode,
        threshold_minutes: f64,
        origin: CellId,
    ) -> Result<BTreeSet<CellId>, StoreError> {
        // The column name comes from the closed Mode enumeration, never
        // from raw user input.
        let column = mode.column();
        let sql = format!(
            "SELECT to_id FROM {TABLE}
             WHERE from_id = ?1 AND {column} IS NOT NULL AND {column} <= ?2"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![origin.0, threshold_minutes], |row| {
            row.get::<_, i64>(0).map(CellId)
        })?;

        let mut destinations = BTreeSet::new();
        for row in rows {
            destinations.insert(row?);
        }
        Ok(destinations)
    }

    /// Full attribute row for one (from, to) pair; `None` when the matrix
    /// has no row for the pair.
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] when the lookup layer fails.
    pub fn pair(&self, from: CellId, to: CellId) -> Result<Option<PairTimes>, StoreError> {
        let mode_columns = Mode::ALL
            .iter()
            .map(|mode| mode.column())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT walk_d, {mode_columns} FROM {TABLE} WHERE from_id = ?1 AND to_id = ?2"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let row = stmt
            .query_row(params![from.0, to.0], |row| {
                let walk_distance_m: Option<f64> = row.get(0)?;
                let mut minutes = BTreeMap::new();
                for (offset, mode) in Mode::ALL.into_iter().enumerate() {
                    minutes.insert(mode, row.get::<_, Option<f64>>(offset + 1)?);
                }
                Ok(PairTimes {
                    from,
                    to,
                    walk_distance_m,
                    minutes,
                })
            })
            .optional()?;
        Ok(row)
    }

    /// Insert one matrix row. Intended for ingest and fixtures; queries
    /// treat the table as read-only.
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] on write failure.
    pub fn insert_pair(
        &self,
        from: CellId,
        to: CellId,
        walk_distance_m: Option<f64>,
        minutes: &[(Mode, f64)],
    ) -> Result<(), StoreError> {
        let mut by_mode: BTreeMap<Mode, f64> = BTreeMap::new();
        for (mode, value) in minutes {
            by_mode.insert(*mode, *value);
        }

        let mode_columns = Mode::ALL
            .iter()
            .map(|mode| mode.column())
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (4..4 + Mode::ALL.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT OR REPLACE INTO {TABLE} (from_id, to_id, walk_d, {mode_columns})
             VALUES (?1, ?2, ?3, {placeholders})"
        );

        let mut values: Vec<rusqlite::types::Value> = vec![
            rusqlite::types::Value::Integer(from.0),
            rusqlite::types::Value::Integer(to.0),
            walk_distance_m.map_or(rusqlite::types::Value::Null, rusqlite::types::Value::Real),
        ];
        for mode in Mode::ALL {
            values.push(by_mode.get(&mode).copied().map_or(
                rusqlite::types::Value::Null,
                rusqlite::types::Value::Real,
            ));
        }

        self.conn
            .execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(())
    }

    /// Load every per-origin CSV export in `dir` into the matrix table.
    ///
    /// Files must carry `from_id` and `to_id` columns; mode and walk
    /// distance columns are matched by name and missing or negative
    /// values (the source's unreachable marker) become NULL. Rows whose
    /// ids do not parse are counted and skipped.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] when the directory cannot be listed and
    /// [`StoreError::Import`] when a file is structurally unusable.
    pub fn import_matrix_csv(&mut self, dir: &Path) -> Result<ImportSummary, StoreError> {
        let entries = std::fs::read_dir(dir).map_err(|source| StoreError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        let mut summary = ImportSummary::default();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("csv") {
                continue;
            }
            let (rows, skipped) = self.import_one_csv(&path)?;
            summary.files += 1;
            summary.rows += rows;
            summary.skipped_rows += skipped;
        }

        tracing::info!(
            files = summary.files,
            rows = summary.rows,
            skipped = summary.skipped_rows,
            "matrix import finished"
        );
        Ok(summary)
    }

    fn import_one_csv(&mut self, path: &Path) -> Result<(usize, usize), StoreError> {
        let import_error = |detail: String| StoreError::Import {
            path: path.display().to_string(),
            detail,
        };

        let mut reader =
            csv::Reader::from_path(path).map_err(|err| import_error(err.to_string()))?;
        let headers = reader
            .headers()
            .map_err(|err| import_error(err.to_string()))?
            .clone();

        let from_index = header_index(&headers, "from_id")
            .ok_or_else(|| import_error("missing `from_id` column".to_string()))?;
        let to_index = header_index(&headers, "to_id")
            .ok_or_else(|| import_error("missing `to_id` column".to_string()))?;
        let walk_d_index = header_index(&headers, "walk_d");
        let mode_indexes: Vec<(Mode, Option<usize>)> = Mode::ALL
            .into_iter()
            .map(|mode| (mode, header_index(&headers, mode.column())))
            .collect();

        let tx = self.conn.transaction()?;
        let mut rows = 0_usize;
        let mut skipped = 0_usize;
        {
            let mode_columns = Mode::ALL
                .iter()
                .map(|mode| mode.column())
                .collect::<Vec<_>>()
                .join(", ");
            let placeholders = (4..4 + Mode::ALL.len())
                .map(|index| format!("?{index}"))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "INSERT OR REPLACE INTO {TABLE} (from_id, to_id, walk_d, {mode_columns})
                 VALUES (?1, ?2, ?3, {placeholders})"
            );
            let mut stmt = tx.prepare(&sql)?;

            for record in reader.records() {
                let record = record.map_err(|err| import_error(err.to_string()))?;
                let Some(from) = record.get(from_index).and_then(parse_id) else {
                    skipped += 1;
                    continue;
                };
                let Some(to) = record.get(to_index).and_then(parse_id) else {
                    skipped += 1;
                    continue;
                };

                let mut values: Vec<rusqlite::types::Value> = vec![
                    rusqlite::types::Value::Integer(from),
                    rusqlite::types::Value::Integer(to),
                    cell_value(walk_d_index.and_then(|index| record.get(index))),
                ];
                for (_, index) in &mode_indexes {
                    values.push(cell_value(index.and_then(|index| record.get(index))));
                }

                stmt.execute(rusqlite::params_from_iter(values))?;
                rows += 1;
            }
        }
        tx.commit()?;
        Ok((rows, skipped))
    }
}

fn schema_sql() -> String {
    let mut mode_columns = String::new();
    for mode in Mode::ALL {
        let _ = writeln!(mode_columns, "  {} REAL,", mode.column());
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {TABLE} (
  from_id INTEGER NOT NULL,
  to_id INTEGER NOT NULL,
  walk_d REAL,
{mode_columns}  PRIMARY KEY (from_id, to_id)
);
CREATE INDEX IF NOT EXISTS idx_travel_times_from ON {TABLE}(from_id);"
    )
}

fn header_index(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|header| header.trim() == name)
}

fn parse_id(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok()
}

/// Matrix cell to SQL value: empty or negative entries (the source's
/// unreachable marker) become NULL.
fn cell_value(raw: Option<&str>) -> rusqlite::types::Value {
    let Some(raw) = raw else {
        return rusqlite::types::Value::Null;
    };
    match raw.trim().parse::<f64>() {
        Ok(value) if value >= 0.0 => rusqlite::types::Value::Real(value),
        _ => rusqlite::types::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> TravelTimeStore {
        let store = match TravelTimeStore::open_in_memory() {
            Ok(store) => store,
            Err(err) => panic!("in-memory store should open: {err}"),
        };
        if let Err(err) = store.init_schema() {
            panic!("schema should initialize: {err}");
        }

        let rows = [
            (100, 101, Some(300.0), 5.0),
            (100, 102, Some(900.0), 12.0),
            (100, 103, Some(2_000.0), 20.0),
            (100, 104, None, 45.0),
            (200, 201, Some(400.0), 8.0),
        ];
        for (from, to, walk_d, walk_avg) in rows {
            if let Err(err) = store.insert_pair(
                CellId(from),
                CellId(to),
                walk_d,
                &[(Mode::WalkAvg, walk_avg), (Mode::CarR, walk_avg / 3.0)],
            ) {
                panic!("fixture row should insert: {err}");
            }
        }
        store
    }

    fn reachable(store: &TravelTimeStore, mode: Mode, threshold: f64, origin: i64) -> BTreeSet<CellId> {
        match store.reachable(mode, threshold, CellId(origin)) {
            Ok(set) => set,
            Err(err) => panic!("reachable should succeed: {err}"),
        }
    }

    #[test]
    fn threshold_is_inclusive() {
        let store = seeded_store();
        let set = reachable(&store, Mode::WalkAvg, 20.0, 100);
        assert!(set.contains(&CellId(103)), "exactly-at-threshold row must be included");
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn reachable_sets_grow_monotonically_with_threshold() {
        let store = seeded_store();
        let thresholds = [0.0, 5.0, 12.0, 20.0, 45.0, 120.0];
        let mut previous = BTreeSet::new();
        for threshold in thresholds {
            let current = reachable(&store, Mode::WalkAvg, threshold, 100);
            assert!(
                previous.is_subset(&current),
                "set at threshold {threshold} lost destinations"
            );
            previous = current;
        }
    }

    #[test]
    fn zero_and_negative_thresholds_yield_empty_sets() {
        let store = seeded_store();
        assert!(reachable(&store, Mode::WalkAvg, 0.0, 100).is_empty());
        assert!(reachable(&store, Mode::WalkAvg, -10.0, 100).is_empty());
    }

    #[test]
    fn unknown_origin_is_an_empty_set_not_an_error() {
        let store = seeded_store();
        assert!(reachable(&store, Mode::WalkAvg, 120.0, 999).is_empty());
    }

    #[test]
    fn origin_is_only_included_via_an_explicit_same_cell_row() {
        let store = seeded_store();
        let set = reachable(&store, Mode::WalkAvg, 120.0, 100);
        assert!(!set.contains(&CellId(100)));

        if let Err(err) =
            store.insert_pair(CellId(100), CellId(100), Some(0.0), &[(Mode::WalkAvg, 0.0)])
        {
            panic!("same-cell row should insert: {err}");
        }
        let set = reachable(&store, Mode::WalkAvg, 0.0, 100);
        assert!(set.contains(&CellId(100)));
    }

    #[test]
    fn null_mode_values_never_match() {
        let store = seeded_store();
        // Fixture rows only populate walk_avg and car_r; bike_avg is NULL.
        assert!(reachable(&store, Mode::BikeAvg, 120.0, 100).is_empty());
    }

    #[test]
    fn pair_returns_all_mode_columns() {
        let store = seeded_store();
        let times = match store.pair(CellId(100), CellId(102)) {
            Ok(Some(times)) => times,
            Ok(None) => panic!("pair row should exist"),
            Err(err) => panic!("pair lookup should succeed: {err}"),
        };
        assert_eq!(times.walk_distance_m, Some(900.0));
        assert_eq!(times.minutes.get(&Mode::WalkAvg), Some(&Some(12.0)));
        assert_eq!(times.minutes.get(&Mode::BikeAvg), Some(&None));
        assert_eq!(times.minutes.len(), Mode::ALL.len());
    }

    #[test]
    fn pair_miss_is_none_not_an_error() {
        let store = seeded_store();
        match store.pair(CellId(100), CellId(999)) {
            Ok(None) => {}
            Ok(Some(_)) => panic!("no row expected"),
            Err(err) => panic!("pair lookup should succeed: {err}"),
        }
    }

    #[test]
    fn import_reads_per_origin_csv_files_and_nulls_negative_values() {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(err) => panic!("tempdir should create: {err}"),
        };
        let csv_path = dir.path().join("travel_times_to_100.csv");
        let body = "from_id,to_id,walk_d,walk_avg,car_r\n\
                    101,100,250.0,4.0,2.0\n\
                    102,100,-1,-1,3.5\n\
                    bogus,100,1.0,1.0,1.0\n";
        if let Err(err) = std::fs::write(&csv_path, body) {
            panic!("fixture csv should write: {err}");
        }

        let mut store = match TravelTimeStore::open_in_memory() {
            Ok(store) => store,
            Err(err) => panic!("in-memory store should open: {err}"),
        };
        if let Err(err) = store.init_schema() {
            panic!("schema should initialize: {err}");
        }

        let summary = match store.import_matrix_csv(dir.path()) {
            Ok(summary) => summary,
            Err(err) => panic!("import should succeed: {err}"),
        };
        assert_eq!(summary.files, 1);
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.skipped_rows, 1);

        // The -1 markers became NULL, so 102 is unreachable on foot but
        // visible by car.
        let on_foot = reachable(&store, Mode::WalkAvg, 120.0, 102);
        assert!(on_foot.is_empty());
        let by_car = reachable(&store, Mode::CarR, 120.0, 102);
        assert_eq!(by_car.len(), 1);
    }
}
