//! Familiar-image selection.
//!
//! The familiar image of a set is the stimulus at rank `min(rank, len - 1)`
//! of the participant's ratings, sorted by rating descending and then by
//! label ascending. Ratings come from the primary store, or from the
//! response cache when the store has nothing (or fails). If neither has
//! rows, the sequencer may fall back to the same position in the unsorted
//! preview set.

use std::cmp::Ordering;

use tracing::{debug, warn};

use crate::cache::ResponseCache;
use crate::constants::familiar::FAMILIAR_RANK_INDEX;
use crate::data::{
    FamiliarOutcome, FamiliarSelection, FamiliarSource, RatingRecord, SetTag, StimulusRecord,
};
use crate::store::ResponseStore;

/// Picks a set's familiar image from prior ratings.
#[derive(Clone, Copy, Debug)]
pub struct FamiliarSelector {
    rank: usize,
}

impl Default for FamiliarSelector {
    fn default() -> Self {
        Self::new(FAMILIAR_RANK_INDEX)
    }
}

impl FamiliarSelector {
    /// Selector that picks the zero-based `rank` of the sorted ratings.
    pub fn new(rank: usize) -> Self {
        Self { rank }
    }

    /// Index used for a candidate list of `len` items (`len > 0`).
    pub fn position(&self, len: usize) -> usize {
        self.rank.min(len.saturating_sub(1))
    }

    /// Select from the store, falling back to the cache. `None` when neither
    /// holds ratings for `set`.
    pub fn select<S>(
        &self,
        set: &SetTag,
        store: &S,
        cache: &ResponseCache,
    ) -> Option<FamiliarSelection>
    where
        S: ResponseStore + ?Sized,
    {
        let key = set.key();
        let mut rows = match store.ratings_for(&key) {
            Ok(rows) => rows,
            Err(err) => {
                warn!(set = %key, error = %err, "rating store query failed; using cache");
                Vec::new()
            }
        };
        if rows.is_empty() {
            rows = cache.get(&key).to_vec();
            if !rows.is_empty() {
                debug!(set = %key, cached = rows.len(), "familiar selection served from cache");
            }
        }
        if rows.is_empty() {
            return None;
        }
        rank_ratings(&mut rows);
        let chosen = &rows[self.position(rows.len())];
        Some(FamiliarSelection {
            src: chosen.stimulus_src.clone(),
            label: chosen.stimulus_label.clone(),
            set_id: set.set_id.clone(),
            rating: Some(chosen.rating),
        })
    }

    /// Stimulus at the familiar position of the unsorted preview set.
    pub fn positional_fallback<'a>(
        &self,
        preview: &'a [StimulusRecord],
    ) -> Option<&'a StimulusRecord> {
        if preview.is_empty() {
            return None;
        }
        preview.get(self.position(preview.len()))
    }

    /// Full familiar computation for one set: ratings first, then the
    /// positional fallback.
    pub fn resolve<S>(
        &self,
        set: &SetTag,
        store: &S,
        cache: &ResponseCache,
        fallback: Option<&StimulusRecord>,
    ) -> FamiliarOutcome
    where
        S: ResponseStore + ?Sized,
    {
        if let Some(selection) = self.select(set, store, cache) {
            return FamiliarOutcome {
                selection: Some(selection),
                source: FamiliarSource::Ratings,
            };
        }
        match fallback {
            Some(stimulus) => FamiliarOutcome {
                selection: Some(FamiliarSelection {
                    src: stimulus.src.clone(),
                    label: stimulus.label.clone(),
                    set_id: set.set_id.clone(),
                    rating: None,
                }),
                source: FamiliarSource::PositionalFallback,
            },
            None => FamiliarOutcome {
                selection: None,
                source: FamiliarSource::Unavailable,
            },
        }
    }
}

/// Sort ratings descending by value, ties broken by ascending label.
pub fn rank_ratings(rows: &mut [RatingRecord]) {
    rows.sort_by(compare_ratings);
}

fn compare_ratings(a: &RatingRecord, b: &RatingRecord) -> Ordering {
    b.rating
        .total_cmp(&a.rating)
        .then_with(|| a.stimulus_label.cmp(&b.stimulus_label))
}
