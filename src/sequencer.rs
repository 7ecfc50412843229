//! Per-set stage expansion.
//!
//! A block is shuffled once; the first `preview_count` stimuli back the
//! preview and rating stages and the next `novel_count` stimuli form the
//! novel pool for preference trials. Sets with fewer unique stimuli than
//! both phases need expand to a single terminal notice.

use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::config::SequencerConfig;
use crate::data::{Block, StimulusRecord};
use crate::familiar::FamiliarSelector;
use crate::step::Step;

/// Shuffled partition of one set into its two disjoint phases.
#[derive(Clone, Debug, PartialEq)]
pub struct SetSplit {
    /// Stimuli previewed and then rated, in presentation order.
    pub preview: Vec<StimulusRecord>,
    /// Stimuli compared against the familiar image, never rated.
    pub novel: Vec<StimulusRecord>,
}

/// Shortfall reported when a set is too small to expand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shortfall {
    pub required: usize,
    pub available: usize,
}

/// Expands blocks into ordered step sequences.
#[derive(Clone, Debug, Default)]
pub struct SetSequencer {
    config: SequencerConfig,
    selector: FamiliarSelector,
}

impl SetSequencer {
    /// Create a sequencer; the familiar rank comes from `config`.
    pub fn new(config: SequencerConfig) -> Self {
        let selector = FamiliarSelector::new(config.familiar_rank);
        Self { config, selector }
    }

    /// Selector used for this sequencer's familiar computation.
    pub fn selector(&self) -> &FamiliarSelector {
        &self.selector
    }

    /// Expansion settings.
    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    /// Shuffle `stimuli` once and slice it into preview and novel phases.
    pub fn split<R: Rng + ?Sized>(
        &self,
        stimuli: &[StimulusRecord],
        rng: &mut R,
    ) -> Result<SetSplit, Shortfall> {
        let required = self.config.min_set_size();
        if stimuli.len() < required {
            return Err(Shortfall {
                required,
                available: stimuli.len(),
            });
        }
        let mut shuffled = stimuli.to_vec();
        shuffled.shuffle(rng);
        let preview: Vec<StimulusRecord> = shuffled.drain(..self.config.preview_count).collect();
        shuffled.truncate(self.config.novel_count);
        Ok(SetSplit {
            preview,
            novel: shuffled,
        })
    }

    /// Ordered steps for one block.
    ///
    /// intro, preview instructions, previews, rating instructions, ratings,
    /// familiar computation, conditional debug, preference instructions,
    /// then a fixation and preference step per novel stimulus.
    pub fn expand<R: Rng + ?Sized>(&self, block: &Block, rng: &mut R) -> Vec<Step> {
        let set = block.tag();
        let split = match self.split(block.stimuli(), rng) {
            Ok(split) => split,
            Err(shortfall) => {
                warn!(
                    set = %set.set_id,
                    category = %set.category,
                    required = shortfall.required,
                    available = shortfall.available,
                    "set has too few unique stimuli; skipping its stages"
                );
                return vec![Step::FatalCount {
                    set,
                    required: shortfall.required,
                    available: shortfall.available,
                }];
            }
        };

        let fallback = self.selector.positional_fallback(&split.preview).cloned();
        let mut steps = Vec::with_capacity(6 + split.preview.len() * 2 + split.novel.len() * 2);
        steps.push(Step::SetIntro {
            set: set.clone(),
            preview_count: split.preview.len(),
            novel_count: split.novel.len(),
        });
        steps.push(Step::PreviewInstructions { set: set.clone() });
        steps.extend(split.preview.iter().map(|stimulus| Step::Preview {
            set: set.clone(),
            stimulus: stimulus.clone(),
            duration_ms: self.config.preview_duration_ms,
        }));
        steps.push(Step::RatingInstructions { set: set.clone() });
        steps.extend(split.preview.iter().map(|stimulus| Step::Rating {
            set: set.clone(),
            stimulus: stimulus.clone(),
        }));
        steps.push(Step::ComputeFamiliar {
            set: set.clone(),
            fallback,
        });
        steps.push(Step::FamiliarDebug { set: set.clone() });
        steps.push(Step::PreferenceInstructions { set: set.clone() });
        for novel in split.novel {
            steps.push(Step::Fixation {
                set: set.clone(),
                duration_ms: self.config.fixation_duration_ms,
            });
            steps.push(Step::Preference {
                set: set.clone(),
                novel,
            });
        }
        debug!(set = %set.set_id, steps = steps.len(), "expanded set stages");
        steps
    }
}
