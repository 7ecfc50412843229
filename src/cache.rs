use indexmap::IndexMap;
use tracing::debug;

use crate::data::{RatingRecord, SetKey};

/// Append-only in-memory mirror of rating responses, keyed by category and
/// normalized set id.
///
/// Familiar selection reads it when the primary store returns nothing or
/// cannot be queried. Entries are never replaced or evicted.
#[derive(Clone, Debug, Default)]
pub struct ResponseCache {
    entries: IndexMap<SetKey, Vec<RatingRecord>>,
    appends: u64,
}

impl ResponseCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rating row under its own set key.
    pub fn push(&mut self, row: RatingRecord) {
        let rows = self.entries.entry(row.key()).or_default();
        rows.push(row);
        self.appends = self.appends.saturating_add(1);
        debug!(cached = rows.len(), "rating cached");
    }

    /// Rows cached for `key`.
    pub fn get(&self, key: &SetKey) -> &[RatingRecord] {
        self.entries
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of rows cached for `key`.
    pub fn len_for(&self, key: &SetKey) -> usize {
        self.get(key).len()
    }

    /// Keys with at least one cached row, in first-append order.
    pub fn keys(&self) -> impl Iterator<Item = &SetKey> {
        self.entries.keys()
    }

    /// Total number of append operations.
    pub fn append_count(&self) -> u64 {
        self.appends
    }

    /// Returns `true` when nothing has been cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of cached rows across all keys.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}
