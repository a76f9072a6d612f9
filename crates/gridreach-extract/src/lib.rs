//! Reachable-set extract files: joins a destination set with its
//! per-origin travel-time export and writes the result as GeoJSON, with
//! an age-based sweep keeping the output directory bounded.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use gridreach_core::{CellId, GridStore, Mode};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Which column of the per-origin file carries the far cell's id.
///
/// The source exports one file per origin where every row describes
/// travel *to* that origin, so the far cell sits in `from_id`. That is
/// the default; `ToId` covers matrices exported the other way around.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum JoinKey {
    #[default]
    FromId,
    ToId,
}

impl JoinKey {
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            Self::FromId => "from_id",
            Self::ToId => "to_id",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub join_key: JoinKey,
    /// Per-origin file name prefix; the origin id and `.csv` follow it.
    pub file_prefix: String,
    /// Extracts older than this are deleted by the sweep.
    pub max_age_days: u64,
    /// File names the sweep must never delete (seed or demo extracts).
    pub protected: BTreeSet<String>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            join_key: JoinKey::default(),
            file_prefix: "travel_times_to_".to_string(),
            max_age_days: 7,
            protected: BTreeSet::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {detail}")]
    Parse { path: String, detail: String },
    #[error("failed to encode extract: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Why a build produced no extract file. None of these are failures;
/// the caller reports them and moves on.
#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    /// The destination set shares no ids with the grid.
    NoMatchingCells,
    /// No per-origin export exists for this origin.
    NoPerOriginFile,
    /// The export exists but holds no row for any destination.
    EmptyJoin,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExtractOutcome {
    Written {
        path: PathBuf,
        sha256: String,
        features: usize,
    },
    Miss {
        reason: MissReason,
    },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Eq, PartialEq)]
pub struct SweepReport {
    pub examined: usize,
    pub deleted: usize,
    pub kept: usize,
}

/// Travel-time attributes joined onto one extract cell.
type JoinRow = BTreeMap<Mode, Option<f64>>;

/// Build the extract for one reachable set: filter the grid to the
/// destination ids, join each cell's travel times from the per-origin
/// export, and write `highlighted_cells_{origin}.geojson` into `out_dir`.
///
/// The file is written to a temporary sibling and renamed into place, so
/// readers never observe a partial extract; a miss leaves no file at
/// all. Output is ordered by cell id, making repeat builds byte-stable.
///
/// # Errors
/// Returns [`ExtractError`] when the matrix export or the output
/// directory is unusable. Empty results are an [`ExtractOutcome::Miss`],
/// not an error.
pub fn build_extract(
    grid: &GridStore,
    destinations: &BTreeSet<CellId>,
    origin: CellId,
    matrix_dir: &Path,
    out_dir: &Path,
    config: &ExtractConfig,
) -> Result<ExtractOutcome, ExtractError> {
    // filter() drops ids the grid does not know and returns cells in id
    // order, which fixes the feature order of the output.
    let cells = grid.filter(destinations);
    if cells.is_empty() {
        return Ok(ExtractOutcome::Miss {
            reason: MissReason::NoMatchingCells,
        });
    }

    let export_path = matrix_dir.join(format!("{}{}.csv", config.file_prefix, origin));
    if !export_path.is_file() {
        return Ok(ExtractOutcome::Miss {
            reason: MissReason::NoPerOriginFile,
        });
    }
    let times = load_join_rows(&export_path, config.join_key)?;

    let mut features = Vec::with_capacity(cells.len());
    for cell in cells {
        let Some(row) = times.get(&cell.id) else {
            continue;
        };

        let mut properties = geojson::JsonObject::new();
        properties.insert("id".to_string(), serde_json::Value::from(cell.id.0));
        for (mode, minutes) in row {
            properties.insert(
                mode.column().to_string(),
                minutes.map_or(serde_json::Value::Null, serde_json::Value::from),
            );
        }

        features.push(geojson::Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(&cell.polygon))),
            id: Some(geojson::feature::Id::Number(cell.id.0.into())),
            properties: Some(properties),
            foreign_members: None,
        });
    }

    if features.is_empty() {
        return Ok(ExtractOutcome::Miss {
            reason: MissReason::EmptyJoin,
        });
    }
    let feature_count = features.len();

    let collection = geojson::FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };
    let body = serde_json::to_string(&collection)?;

    let final_path = out_dir.join(format!("highlighted_cells_{origin}.geojson"));
    let digest = write_atomically(&final_path, body.as_bytes())?;

    tracing::info!(
        origin = %origin,
        features = feature_count,
        path = %final_path.display(),
        "wrote extract"
    );
    Ok(ExtractOutcome::Written {
        path: final_path,
        sha256: digest,
        features: feature_count,
    })
}

/// Delete every file in `dir` older than `config.max_age_days`.
///
/// Protected names are never deleted. Per-file failures are logged and
/// skipped so one stubborn file cannot stall the sweep; a directory that
/// does not exist yet is a no-op.
///
/// # Errors
/// Returns [`ExtractError::Io`] when an existing `dir` cannot be listed.
pub fn sweep(dir: &Path, config: &ExtractConfig) -> Result<SweepReport, ExtractError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(SweepReport::default());
        }
        Err(source) => {
            return Err(ExtractError::Io {
                path: dir.display().to_string(),
                source,
            });
        }
    };
    let cutoff = SystemTime::now() - Duration::from_secs(config.max_age_days * 24 * 60 * 60);

    let mut report = SweepReport::default();
    for entry in entries {
        let Ok(entry) = entry else {
            continue;
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        report.examined += 1;

        let name = entry.file_name().to_string_lossy().to_string();
        if config.protected.contains(&name) {
            report.kept += 1;
            continue;
        }

        let modified = entry.metadata().and_then(|meta| meta.modified());
        match modified {
            Ok(modified) if modified < cutoff => match std::fs::remove_file(&path) {
                Ok(()) => {
                    report.deleted += 1;
                    tracing::debug!(file = %name, "swept expired extract");
                }
                Err(err) => {
                    report.kept += 1;
                    tracing::warn!(file = %name, error = %err, "failed to sweep extract");
                }
            },
            Ok(_) => report.kept += 1,
            Err(err) => {
                report.kept += 1;
                tracing::warn!(file = %name, error = %err, "extract has no readable mtime");
            }
        }
    }

    if report.deleted > 0 {
        tracing::info!(deleted = report.deleted, kept = report.kept, "extract sweep done");
    }
    Ok(report)
}

fn load_join_rows(path: &Path, join_key: JoinKey) -> Result<BTreeMap<CellId, JoinRow>, ExtractError> {
    let parse_error = |detail: String| ExtractError::Parse {
        path: path.display().to_string(),
        detail,
    };

    let mut reader = csv::Reader::from_path(path).map_err(|err| parse_error(err.to_string()))?;
    let headers = reader
        .headers()
        .map_err(|err| parse_error(err.to_string()))?
        .clone();

    let key_index = headers
        .iter()
        .position(|header| header.trim() == join_key.column())
        .ok_or_else(|| parse_error(format!("missing `{}` column", join_key.column())))?;
    let mode_indexes: Vec<(Mode, Option<usize>)> = Mode::ALL
        .into_iter()
        .map(|mode| {
            (
                mode,
                headers.iter().position(|header| header.trim() == mode.column()),
            )
        })
        .collect();

    let mut rows = BTreeMap::new();
    for record in reader.records() {
        let record = record.map_err(|err| parse_error(err.to_string()))?;
        let Some(key) = record
            .get(key_index)
            .and_then(|raw| raw.trim().parse::<i64>().ok())
        else {
            continue;
        };

        let mut row = JoinRow::new();
        for (mode, index) in &mode_indexes {
            let minutes = index
                .and_then(|index| record.get(index))
                .and_then(|raw| raw.trim().parse::<f64>().ok())
                .filter(|value| *value >= 0.0);
            row.insert(*mode, minutes);
        }
        rows.insert(CellId(key), row);
    }
    Ok(rows)
}

/// Write through a temporary sibling and rename, returning the content's
/// hex sha-256.
fn write_atomically(final_path: &Path, body: &[u8]) -> Result<String, ExtractError> {
    let io_error = |source: std::io::Error| ExtractError::Io {
        path: final_path.display().to_string(),
        source,
    };

    let mut tmp_path = final_path.to_path_buf();
    tmp_path.set_extension("geojson.tmp");

    let mut file = std::fs::File::create(&tmp_path).map_err(io_error)?;
    file.write_all(body).map_err(io_error)?;
    file.sync_all().map_err(io_error)?;
    drop(file);
    std::fs::rename(&tmp_path, final_path).map_err(io_error)?;

    let mut hasher = Sha256::new();
    hasher.update(body);
    Ok(format!("{:x}", hasher.finalize()))
}
