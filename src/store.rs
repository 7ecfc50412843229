//! Primary response store.
//!
//! Ownership model:
//! - `ResponseStore` is the engine-facing interface for appending rows and
//!   querying ratings back.
//! - `InMemoryResponseStore` keeps rows in append order and is what a run
//!   exports at the end.

use crate::data::{DataRow, RatingRecord, SetKey};
use crate::errors::EngineError;

/// Append-only store of every row a run produces.
///
/// `ratings_for` may fail (for example when the backing store cannot be
/// queried mid-run); callers fall back to the response cache.
pub trait ResponseStore {
    /// Append one row. Rows are never mutated after this call.
    fn append(&mut self, row: DataRow) -> Result<(), EngineError>;

    /// Rating rows recorded for the set identified by `key`.
    fn ratings_for(&self, key: &SetKey) -> Result<Vec<RatingRecord>, EngineError>;

    /// All rows in append order.
    fn rows(&self) -> &[DataRow];

    /// Number of stored rows.
    fn len(&self) -> usize {
        self.rows().len()
    }

    /// Returns `true` when nothing has been stored.
    fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }
}

/// Vector-backed store used for local runs and tests.
#[derive(Clone, Debug, Default)]
pub struct InMemoryResponseStore {
    rows: Vec<DataRow>,
}

impl InMemoryResponseStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the store and return its rows.
    pub fn into_rows(self) -> Vec<DataRow> {
        self.rows
    }
}

impl ResponseStore for InMemoryResponseStore {
    fn append(&mut self, row: DataRow) -> Result<(), EngineError> {
        self.rows.push(row);
        Ok(())
    }

    fn ratings_for(&self, key: &SetKey) -> Result<Vec<RatingRecord>, EngineError> {
        Ok(self
            .rows
            .iter()
            .filter_map(DataRow::as_rating)
            .filter(|row| row.category == key.category && row.normalized_category == key.set)
            .cloned()
            .collect())
    }

    fn rows(&self) -> &[DataRow] {
        &self.rows
    }
}
