use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

mod grid;
mod mode;
mod population;
mod proj;
mod session;

pub use grid::{load_grid, GridCell, GridStore, SourceCrs};
pub use mode::Mode;
pub use population::{PopulationStore, DEFAULT_POPULATION_COLUMN};
pub use proj::tm35fin_to_wgs84;
pub use session::{PairSelection, QueryPair};

/// Area of one uniform grid cell in km² (250 m x 250 m grid).
pub const CELL_AREA_KM2: f64 = 0.0625;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {detail}")]
    Parse { path: String, detail: String },
}

/// Integer identifier of one grid cell, assigned by the source matrix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CellId(pub i64);

impl Display for CellId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CellId {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|_| CoreError::Validation(format!("malformed cell id: {value}")))
    }
}

/// Approximate covered area for a reachable set, from cell count alone.
///
/// Assumes the uniform-grid invariant; the area is never recomputed from
/// geometry. Rounded to 2 decimal places for display.
#[must_use]
pub fn approx_area_km2(cell_count: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let raw = cell_count as f64 * CELL_AREA_KM2;
    (raw * 100.0).round() / 100.0
}

/// Per-query reachability result, discarded after the response is rendered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReachabilitySummary {
    pub origin: CellId,
    pub mode: Mode,
    pub threshold_minutes: i64,
    pub cells: usize,
    pub total_population: u64,
    pub approx_area_km2: f64,
}

impl ReachabilitySummary {
    #[must_use]
    pub fn new(
        origin: CellId,
        mode: Mode,
        threshold_minutes: i64,
        destinations: &std::collections::BTreeSet<CellId>,
        population: &PopulationStore,
    ) -> Self {
        Self {
            origin,
            mode,
            threshold_minutes,
            cells: destinations.len(),
            total_population: population.population_of(destinations),
            approx_area_km2: approx_area_km2(destinations.len()),
        }
    }
}
