use serde::{Deserialize, Serialize};

/// One travel-mode / time-of-day / speed variant of the matrix.
///
/// This enumeration is the single authoritative mapping between user-facing
/// mode keys, human labels, and storage column identifiers. Query code must
/// never interpolate a mode string into SQL except through [`Mode::column`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    WalkAvg,
    WalkSlo,
    BikeAvg,
    BikeFst,
    BikeSlo,
    PtRAvg,
    PtRSlo,
    PtMAvg,
    PtMSlo,
    PtNAvg,
    PtNSlo,
    CarR,
    CarM,
    CarN,
}

impl Mode {
    pub const ALL: [Self; 14] = [
        Self::WalkAvg,
        Self::WalkSlo,
        Self::BikeAvg,
        Self::BikeFst,
        Self::BikeSlo,
        Self::PtRAvg,
        Self::PtRSlo,
        Self::PtMAvg,
        Self::PtMSlo,
        Self::PtNAvg,
        Self::PtNSlo,
        Self::CarR,
        Self::CarM,
        Self::CarN,
    ];

    /// Storage column identifier, also the canonical user-facing key.
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            Self::WalkAvg => "walk_avg",
            Self::WalkSlo => "walk_slo",
            Self::BikeAvg => "bike_avg",
            Self::BikeFst => "bike_fst",
            Self::BikeSlo => "bike_slo",
            Self::PtRAvg => "pt_r_avg",
            Self::PtRSlo => "pt_r_slo",
            Self::PtMAvg => "pt_m_avg",
            Self::PtMSlo => "pt_m_slo",
            Self::PtNAvg => "pt_n_avg",
            Self::PtNSlo => "pt_n_slo",
            Self::CarR => "car_r",
            Self::CarM => "car_m",
            Self::CarN => "car_n",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::WalkAvg => "Walking (average speed)",
            Self::WalkSlo => "Walking (slow speed)",
            Self::BikeAvg => "Cycling (average speed)",
            Self::BikeFst => "Cycling (fast speed)",
            Self::BikeSlo => "Cycling (slow speed)",
            Self::PtRAvg => "Public transport (rush hour, average walk)",
            Self::PtRSlo => "Public transport (rush hour, slow walk)",
            Self::PtMAvg => "Public transport (midday, average walk)",
            Self::PtMSlo => "Public transport (midday, slow walk)",
            Self::PtNAvg => "Public transport (night, average walk)",
            Self::PtNSlo => "Public transport (night, slow walk)",
            Self::CarR => "Car (rush hour)",
            Self::CarM => "Car (midday)",
            Self::CarN => "Car (night)",
        }
    }

    /// Validate a user-chosen mode key against the closed enumeration.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.column() == value)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}
