//! Category/set grouping of manifest records.

use indexmap::IndexMap;

use crate::constants::index::ROOT_SET_ID;
use crate::constants::plan::PLAN_CATEGORIES;
use crate::data::{Category, StimulusRecord};
use crate::types::SetId;
use crate::utils::normalize_key;

/// Sets of one category, in first-seen manifest order.
pub type SetMap = IndexMap<SetId, Vec<StimulusRecord>>;

/// Stimulus records grouped by category, then by set.
///
/// Every plan category is present, possibly with an empty set map.
#[derive(Clone, Debug, Default)]
pub struct StimulusIndex {
    categories: IndexMap<Category, SetMap>,
}

impl StimulusIndex {
    /// Group records by category and set. Records without a set land in the
    /// root set of their category.
    pub fn build(records: &[StimulusRecord]) -> Self {
        let mut categories: IndexMap<Category, SetMap> = PLAN_CATEGORIES
            .iter()
            .map(|category| (*category, SetMap::new()))
            .collect();
        for record in records {
            let set_id = record
                .set
                .as_deref()
                .map(str::trim)
                .filter(|set| !set.is_empty())
                .unwrap_or(ROOT_SET_ID);
            categories
                .entry(record.category)
                .or_default()
                .entry(set_id.to_string())
                .or_default()
                .push(record.clone());
        }
        Self { categories }
    }

    /// Sets of `category` (empty when the category has no records).
    pub fn sets(&self, category: Category) -> &SetMap {
        static EMPTY: std::sync::OnceLock<SetMap> = std::sync::OnceLock::new();
        self.categories
            .get(&category)
            .unwrap_or_else(|| EMPTY.get_or_init(SetMap::new))
    }

    /// Find a set by normalized identifier.
    pub fn find_set(&self, category: Category, set_id: &str) -> Option<(&SetId, &[StimulusRecord])> {
        let wanted = normalize_key(set_id);
        self.sets(category)
            .iter()
            .find(|(candidate, _)| normalize_key(candidate.as_str()) == wanted)
            .map(|(id, records)| (id, records.as_slice()))
    }

    /// Total number of indexed records.
    pub fn total_records(&self) -> usize {
        self.categories
            .values()
            .flat_map(|sets| sets.values())
            .map(Vec::len)
            .sum()
    }

    /// Returns `true` when no records were indexed.
    pub fn is_empty(&self) -> bool {
        self.total_records() == 0
    }
}
