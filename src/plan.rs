//! Per-participant plan construction.
//!
//! Categories are visited in a shuffled order. Geometry and natural-scene
//! sets are all included, sorted by set id. Face sets are chosen by
//! in-group/out-group: the participant's own set first (when it exists),
//! then up to `max_outgroup_sets` shuffled sets of a different race.

use rand::Rng;
use rand::seq::{IndexedRandom, SliceRandom};
use tracing::{debug, info};

use crate::config::{PlanConfig, ProfileFallback, RunParams};
use crate::constants::plan::{
    ADULT_AGE_RANGES, FACE_EXPRESSION, GENDER_TOKENS, PLAN_CATEGORIES, VALID_RACES,
    YOUNG_ADULT_AGE_RANGES,
};
use crate::data::{Block, Category, ParticipantProfile, PlanRecord, PlannedSet, StimulusRecord};
use crate::index::StimulusIndex;
use crate::types::SetId;
use crate::utils::normalize_key;

/// Age bucket used in face set identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgeGroup {
    YoungAdult,
    Adult,
}

impl AgeGroup {
    /// Token as it appears in set identifiers.
    pub const fn as_str(&self) -> &'static str {
        match self {
            AgeGroup::YoungAdult => "young_adult",
            AgeGroup::Adult => "adult",
        }
    }

    /// Bucket a numeric age: strictly above `threshold` is `Adult`.
    pub fn from_age(age: u32, threshold: u32) -> Self {
        if age > threshold {
            AgeGroup::Adult
        } else {
            AgeGroup::YoungAdult
        }
    }

    /// Bucket a demographics-form age range; unknown ranges yield `None`.
    pub fn from_age_range(range: &str) -> Option<Self> {
        let range = range.trim();
        if YOUNG_ADULT_AGE_RANGES.contains(&range) {
            Some(AgeGroup::YoungAdult)
        } else if ADULT_AGE_RANGES.contains(&range) {
            Some(AgeGroup::Adult)
        } else {
            None
        }
    }
}

/// The participant's own face set, derived from their profile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InGroup {
    /// `Male` or `Female`.
    pub gender: &'static str,
    /// One of the valid race tokens.
    pub race: &'static str,
    /// Age bucket.
    pub age_group: AgeGroup,
}

impl InGroup {
    /// Set identifier `"{Gender}-{race}-{ageGroup}-neutral"`.
    pub fn set_id(&self) -> SetId {
        format!(
            "{}-{}-{}-{}",
            self.gender,
            self.race,
            self.age_group.as_str(),
            FACE_EXPRESSION
        )
    }
}

/// Derive the in-group from a profile.
///
/// With [`ProfileFallback::Sample`], missing or unrecognized fields are drawn
/// uniformly from their valid values, so a result is always produced. With
/// [`ProfileFallback::Strict`], any unresolved field yields `None`.
pub fn resolve_in_group<R: Rng + ?Sized>(
    profile: &ParticipantProfile,
    config: &PlanConfig,
    rng: &mut R,
) -> Option<InGroup> {
    let sample = config.profile_fallback == ProfileFallback::Sample;

    let gender = match gender_token(profile.gender_birth.as_deref()) {
        Some(token) => token,
        None if sample => *GENDER_TOKENS.choose(rng)?,
        None => return None,
    };
    let race = match race_token(profile.race.as_deref()) {
        Some(token) => token,
        None if sample => *VALID_RACES.choose(rng)?,
        None => return None,
    };
    let known_age = profile
        .age
        .map(|age| AgeGroup::from_age(age, config.adult_age_threshold))
        .or_else(|| profile.age_range.as_deref().and_then(AgeGroup::from_age_range));
    let age_group = match known_age {
        Some(group) => group,
        None if sample => {
            if rng.random_bool(0.5) {
                AgeGroup::YoungAdult
            } else {
                AgeGroup::Adult
            }
        }
        None => return None,
    };
    Some(InGroup {
        gender,
        race,
        age_group,
    })
}

fn gender_token(raw: Option<&str>) -> Option<&'static str> {
    let normalized = normalize_key(raw?);
    GENDER_TOKENS
        .iter()
        .copied()
        .find(|token| token.eq_ignore_ascii_case(&normalized))
}

fn race_token(raw: Option<&str>) -> Option<&'static str> {
    let normalized = normalize_key(raw?);
    VALID_RACES
        .iter()
        .copied()
        .find(|token| *token == normalized)
}

/// Race token of a face set identifier (`Female-asian-adult-neutral` → `asian`).
pub fn parse_race_token(set_id: &str) -> Option<String> {
    set_id
        .split('-')
        .nth(1)
        .map(normalize_key)
        .filter(|token| !token.is_empty())
}

/// Ordered blocks a participant will see, with the decisions behind them.
#[derive(Clone, Debug, Default)]
pub struct Plan {
    /// Blocks in presentation order.
    pub blocks: Vec<Block>,
    /// Order categories were visited in.
    pub category_order: Vec<Category>,
    /// In-group set id, when one could be derived (whether or not it exists).
    pub in_group: Option<SetId>,
}

impl Plan {
    /// Keep only blocks matching the run-scoping filters (normalized match).
    pub fn apply_scope(mut self, params: &RunParams) -> Self {
        if let Some(only_category) = params.only_category.as_deref() {
            let wanted = Category::parse(only_category);
            self.blocks.retain(|block| Some(block.category) == wanted);
        }
        if let Some(only_set) = params.only_set.as_deref() {
            let wanted = normalize_key(only_set);
            self.blocks
                .retain(|block| normalize_key(&block.set_id) == wanted);
        }
        self
    }

    /// Loggable/exportable summary of this plan.
    pub fn record(&self, params: &RunParams) -> PlanRecord {
        PlanRecord {
            only_category: params.only_category.clone(),
            only_set: params.only_set.clone(),
            test_questionnaire: params.test_questionnaire,
            in_group: self.in_group.clone(),
            category_order: self.category_order.clone(),
            sets: self
                .blocks
                .iter()
                .map(|block| PlannedSet {
                    category: block.category,
                    set_id: block.set_id.clone(),
                })
                .collect(),
        }
    }
}

/// Builds a participant's plan from the stimulus index.
pub struct PlanBuilder<'a> {
    index: &'a StimulusIndex,
    config: PlanConfig,
}

impl<'a> PlanBuilder<'a> {
    /// Create a builder over `index`.
    pub fn new(index: &'a StimulusIndex, config: PlanConfig) -> Self {
        Self { index, config }
    }

    /// Build the ordered block list for `profile`.
    pub fn build<R: Rng + ?Sized>(&self, profile: &ParticipantProfile, rng: &mut R) -> Plan {
        let mut category_order = PLAN_CATEGORIES.to_vec();
        category_order.shuffle(rng);

        let mut plan = Plan {
            category_order: category_order.clone(),
            ..Plan::default()
        };
        for category in category_order {
            match category {
                Category::Face => {
                    let in_group = resolve_in_group(profile, &self.config, rng);
                    plan.in_group = in_group.as_ref().map(InGroup::set_id);
                    plan.blocks.extend(self.face_blocks(in_group.as_ref(), rng));
                }
                other => plan.blocks.extend(self.sorted_blocks(other, rng)),
            }
        }
        info!(
            in_group = ?plan.in_group,
            category_order = ?plan.category_order,
            blocks = plan.blocks.len(),
            "built participant plan"
        );
        plan
    }

    /// Face blocks: in-group first when present, then up to the configured
    /// number of shuffled out-group sets of a different race.
    pub fn face_blocks<R: Rng + ?Sized>(
        &self,
        in_group: Option<&InGroup>,
        rng: &mut R,
    ) -> Vec<Block> {
        let sets = self.index.sets(Category::Face);
        if sets.is_empty() {
            return Vec::new();
        }
        let in_group_key = in_group.map(|group| normalize_key(group.set_id()));
        let mut blocks = Vec::new();

        if let Some(group) = in_group
            && let Some((set_id, stimuli)) = self.index.find_set(Category::Face, &group.set_id())
            && let Some(block) = shuffled_block(Category::Face, set_id, stimuli, rng)
        {
            blocks.push(block);
        }

        let mut candidates = outgroup_candidates(
            sets.keys().map(String::as_str),
            in_group_key.as_deref(),
            in_group.map(|group| group.race),
        );
        candidates.shuffle(rng);
        debug!(
            in_group = ?in_group_key,
            candidates = ?candidates,
            "face out-group candidates"
        );
        for set_id in candidates.into_iter().take(self.config.max_outgroup_sets) {
            if let Some(block) = shuffled_block(Category::Face, set_id, &sets[set_id], rng) {
                blocks.push(block);
            }
        }
        blocks
    }

    fn sorted_blocks<R: Rng + ?Sized>(&self, category: Category, rng: &mut R) -> Vec<Block> {
        let sets = self.index.sets(category);
        let mut set_ids: Vec<&SetId> = sets.keys().collect();
        set_ids.sort();
        set_ids
            .into_iter()
            .filter_map(|set_id| shuffled_block(category, set_id, &sets[set_id], rng))
            .collect()
    }
}

/// Face sets eligible as out-group: not the in-group itself and not sharing
/// the in-group's race token. Order follows `set_ids`.
pub fn outgroup_candidates<'s>(
    set_ids: impl IntoIterator<Item = &'s str>,
    in_group_key: Option<&str>,
    in_group_race: Option<&str>,
) -> Vec<&'s str> {
    set_ids
        .into_iter()
        .filter(|set_id| Some(normalize_key(set_id).as_str()) != in_group_key)
        .filter(|set_id| match in_group_race {
            Some(race) => parse_race_token(set_id).as_deref() != Some(race),
            None => true,
        })
        .collect()
}

fn shuffled_block<R: Rng + ?Sized>(
    category: Category,
    set_id: &str,
    stimuli: &[StimulusRecord],
    rng: &mut R,
) -> Option<Block> {
    let mut stimuli = stimuli.to_vec();
    stimuli.shuffle(rng);
    Block::new(category, set_id, stimuli)
}
