use serde::{Deserialize, Serialize};

use crate::CellId;

/// An origin/destination pair produced by two successive cell clicks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct QueryPair {
    pub from: CellId,
    pub to: CellId,
}

/// Click-sequence state for pair queries, scoped to one user session.
///
/// The value is passed in and returned by each interaction instead of
/// living in process-wide state, so concurrent sessions cannot interfere
/// with each other. The second click emits the query pair and resets the
/// selection; a further click starts a new pair.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct PairSelection {
    first: Option<CellId>,
}

impl PairSelection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pending(&self) -> Option<CellId> {
        self.first
    }

    /// Record one click. Returns the updated selection and, on every
    /// second click, the emitted query pair.
    #[must_use]
    pub fn click(self, id: CellId) -> (Self, Option<QueryPair>) {
        match self.first {
            None => (Self { first: Some(id) }, None),
            Some(from) => (Self { first: None }, Some(QueryPair { from, to: id })),
        }
    }
}
