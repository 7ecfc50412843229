use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::utils::normalize_key;

pub use crate::types::{
    NormalizedKey, QuestionName, QuestionnaireName, SetId, StimulusLabel, StimulusSrc,
};

/// Stimulus category. Each category is partitioned into sets.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Face photographs, grouped by gender/race/age sets.
    Face,
    /// Geometric patterns.
    Geometry,
    /// Natural scenes.
    NaturalScene,
}

impl Category {
    /// Canonical snake_case name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Category::Face => "face",
            Category::Geometry => "geometry",
            Category::NaturalScene => "natural_scene",
        }
    }

    /// Parse a manifest category string after normalization.
    ///
    /// Spaces and dashes are accepted in place of underscores
    /// (`Natural Scene`, `natural-scene`).
    pub fn parse(raw: &str) -> Option<Self> {
        let key = normalize_key(raw).replace([' ', '-'], "_");
        match key.as_str() {
            "face" => Some(Category::Face),
            "geometry" => Some(Category::Geometry),
            "natural_scene" => Some(Category::NaturalScene),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One image from the stimulus manifest. Immutable once loaded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StimulusRecord {
    /// Image location handed to the presentation runner.
    pub src: StimulusSrc,
    /// Label used for exports and rating tie-breaks.
    pub label: StimulusLabel,
    /// Category the image belongs to.
    pub category: Category,
    /// Set within the category; `None` groups under the root set.
    #[serde(default)]
    pub set: Option<SetId>,
}

/// Demographic answers used to derive the in-group face set.
///
/// Populated by the external demographics step and read-only afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantProfile {
    /// Age in years, when reported numerically.
    #[serde(default)]
    pub age: Option<u32>,
    /// Age bracket from the demographics form (for example `25-34`).
    #[serde(default)]
    pub age_range: Option<String>,
    /// Gender at birth (`male`, `female`, or anything else).
    #[serde(default)]
    pub gender_birth: Option<String>,
    /// Self-reported race (`asian`, `black`, `latino`, `white`, or anything else).
    #[serde(default)]
    pub race: Option<String>,
}

/// Lookup key for everything recorded against one set: the category plus
/// the normalized set id.
///
/// Set ids are only unique within a category (every category has its own
/// root set), so rating, cache, and familiar lookups never use the set id
/// alone.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SetKey {
    /// Category of the set.
    pub category: Category,
    /// Normalized set identifier.
    pub set: NormalizedKey,
}

impl SetKey {
    /// Key for `set_id` within `category`; the id is normalized.
    pub fn new(category: Category, set_id: &str) -> Self {
        Self {
            category,
            set: normalize_key(set_id),
        }
    }
}

impl fmt::Display for SetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.set)
    }
}

/// Identity of one category/set unit, carried by every step of its sequence.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SetTag {
    /// Category of the set.
    pub category: Category,
    /// Set identifier from the manifest.
    pub set_id: SetId,
    /// Display label for the set.
    pub set_label: String,
    /// Normalized set identifier used for every lookup.
    pub normalized_category: NormalizedKey,
}

impl SetTag {
    /// Build a tag whose label equals the set id.
    pub fn new(category: Category, set_id: impl Into<SetId>) -> Self {
        let set_id = set_id.into();
        Self {
            category,
            set_label: set_id.clone(),
            normalized_category: normalize_key(&set_id),
            set_id,
        }
    }

    /// Category-qualified lookup key.
    pub fn key(&self) -> SetKey {
        SetKey {
            category: self.category,
            set: self.normalized_category.clone(),
        }
    }
}

/// One category+set unit of work with its ordered stimuli.
///
/// `stimuli` is never empty and holds no duplicate `src`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Block {
    /// Category of the set.
    pub category: Category,
    /// Set identifier from the manifest.
    pub set_id: SetId,
    /// Display label for the set.
    pub set_label: String,
    stimuli: Vec<StimulusRecord>,
}

impl Block {
    /// Build a block, dropping repeated `src` entries (first occurrence wins).
    ///
    /// Returns `None` when no stimuli remain.
    pub fn new(
        category: Category,
        set_id: impl Into<SetId>,
        stimuli: Vec<StimulusRecord>,
    ) -> Option<Self> {
        let set_id = set_id.into();
        let total = stimuli.len();
        let mut seen = HashSet::with_capacity(total);
        let stimuli: Vec<StimulusRecord> = stimuli
            .into_iter()
            .filter(|stimulus| seen.insert(stimulus.src.clone()))
            .collect();
        if stimuli.len() < total {
            warn!(
                set_id = %set_id,
                dropped = total - stimuli.len(),
                "dropping duplicate stimulus sources from block"
            );
        }
        if stimuli.is_empty() {
            return None;
        }
        Some(Self {
            category,
            set_label: set_id.clone(),
            set_id,
            stimuli,
        })
    }

    /// Ordered stimuli of this block.
    pub fn stimuli(&self) -> &[StimulusRecord] {
        &self.stimuli
    }

    /// Tag identifying this block in steps and records.
    pub fn tag(&self) -> SetTag {
        SetTag {
            category: self.category,
            set_id: self.set_id.clone(),
            set_label: self.set_label.clone(),
            normalized_category: normalize_key(&self.set_id),
        }
    }
}

/// One completed rating trial. Written once, never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RatingRecord {
    /// Category of the rated set.
    pub category: Category,
    /// Set identifier of the rated stimulus.
    pub set_id: SetId,
    /// Normalized set identifier; the key used by familiar selection.
    pub normalized_category: NormalizedKey,
    /// Display label for the set.
    pub set_label: String,
    /// Rated stimulus source.
    pub stimulus_src: StimulusSrc,
    /// Rated stimulus label.
    pub stimulus_label: StimulusLabel,
    /// When the rating screen was presented.
    pub utc_start: DateTime<Utc>,
    /// When the rating was submitted.
    pub utc_end: DateTime<Utc>,
    /// Response time reported by the runner, in milliseconds.
    pub rt: Option<u64>,
    /// Raw slider value.
    pub response: f64,
    /// Rating used for familiar ranking (equal to `response`).
    pub rating: f64,
}

impl RatingRecord {
    /// Category-qualified key of the rated set.
    pub fn key(&self) -> SetKey {
        SetKey {
            category: self.category,
            set: self.normalized_category.clone(),
        }
    }
}

/// The stimulus chosen as a set's familiar anchor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FamiliarSelection {
    /// Familiar image source.
    pub src: StimulusSrc,
    /// Familiar image label.
    pub label: StimulusLabel,
    /// Set the image was selected for.
    pub set_id: SetId,
    /// Rating that ranked it; `None` for the positional fallback.
    pub rating: Option<f64>,
}

/// How a set's familiar image was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamiliarSource {
    /// Ranked from the participant's ratings.
    Ratings,
    /// Taken by position from the unsorted preview set.
    PositionalFallback,
    /// No familiar image could be produced.
    Unavailable,
}

/// Result of the familiar-computation step for one set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FamiliarOutcome {
    /// Selected familiar image, if any.
    pub selection: Option<FamiliarSelection>,
    /// Which path produced the selection.
    pub source: FamiliarSource,
}

/// Screen side of an image in a preference trial.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Left image; negative slider values favor it.
    Left,
    /// Right image; positive slider values favor it.
    Right,
}

impl Side {
    /// The other side.
    pub const fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Immutable layout of one preference trial, fixed when the trial is drawn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PreferenceTrial {
    /// Familiar anchor image.
    pub familiar: FamiliarSelection,
    /// Novel comparison image.
    pub novel: StimulusRecord,
    /// Whether the familiar image sits on the left.
    pub familiar_on_left: bool,
}

impl PreferenceTrial {
    /// Side holding the familiar image.
    pub fn familiar_side(&self) -> Side {
        if self.familiar_on_left {
            Side::Left
        } else {
            Side::Right
        }
    }

    /// Side holding the novel image.
    pub fn novel_side(&self) -> Side {
        self.familiar_side().opposite()
    }

    /// `(src, label)` of the left image.
    pub fn left(&self) -> (&str, &str) {
        if self.familiar_on_left {
            (&self.familiar.src, &self.familiar.label)
        } else {
            (&self.novel.src, &self.novel.label)
        }
    }

    /// `(src, label)` of the right image.
    pub fn right(&self) -> (&str, &str) {
        if self.familiar_on_left {
            (&self.novel.src, &self.novel.label)
        } else {
            (&self.familiar.src, &self.familiar.label)
        }
    }
}

/// One completed preference trial.
///
/// `preference` is stored as given on the fixed left-negative/right-positive
/// scale; the sides are recorded so it can be reinterpreted later.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PreferenceRecord {
    /// Category of the set.
    pub category: Category,
    /// Set identifier.
    pub set_id: SetId,
    /// Normalized set identifier.
    pub normalized_category: NormalizedKey,
    /// Display label for the set.
    pub set_label: String,
    /// Familiar image source.
    pub familiar_src: StimulusSrc,
    /// Familiar image label.
    pub familiar_label: StimulusLabel,
    /// Novel image source.
    pub novel_src: StimulusSrc,
    /// Novel image label.
    pub novel_label: StimulusLabel,
    /// Whether the familiar image was on the left.
    pub familiar_on_left: bool,
    /// Side of the familiar image.
    pub familiar_side: Side,
    /// Side of the novel image.
    pub novel_side: Side,
    /// Left image source.
    pub left_src: StimulusSrc,
    /// Left image label.
    pub left_label: StimulusLabel,
    /// Right image source.
    pub right_src: StimulusSrc,
    /// Right image label.
    pub right_label: StimulusLabel,
    /// Raw slider value (-3..=3).
    pub preference: i32,
    /// When the trial was presented.
    pub utc_start: DateTime<Utc>,
    /// When the response was submitted.
    pub utc_end: DateTime<Utc>,
    /// Response time in milliseconds.
    pub rt: Option<u64>,
}

/// One preview exposure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PreviewRecord {
    pub set_id: SetId,
    pub normalized_category: NormalizedKey,
    pub stimulus_src: StimulusSrc,
    pub stimulus_label: StimulusLabel,
    pub utc_start: DateTime<Utc>,
    pub utc_end: DateTime<Utc>,
}

/// Acknowledgement of an instruction, intro, fixation, or outro screen.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScreenRecord {
    /// Screen name (`category_intro`, `rating_instructions`, ...).
    pub screen: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_id: Option<SetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_category: Option<NormalizedKey>,
    pub rt: Option<u64>,
}

/// Summary of the plan a participant received.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    pub only_category: Option<String>,
    pub only_set: Option<String>,
    pub test_questionnaire: bool,
    pub in_group: Option<SetId>,
    pub category_order: Vec<Category>,
    pub sets: Vec<PlannedSet>,
}

/// One entry of a [`PlanRecord`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlannedSet {
    pub category: Category,
    pub set_id: SetId,
}

/// Familiar selection decision for one set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FamiliarRecord {
    pub set_id: SetId,
    pub category: Category,
    pub normalized_category: NormalizedKey,
    pub familiar_src: Option<StimulusSrc>,
    pub familiar_label: Option<StimulusLabel>,
    pub rating_count: usize,
    pub cache_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A set that failed the minimum-count guard.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CountViolation {
    pub set_id: SetId,
    pub category: Category,
    pub required: usize,
    pub available: usize,
}

/// A set whose preference stage could not run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SetFailure {
    pub set_id: SetId,
    pub category: Category,
    pub normalized_category: NormalizedKey,
    pub message: String,
}

/// One evaluated comprehension check.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComprehensionRecord {
    /// One-based attempt number.
    pub attempt: u32,
    /// Whether both answers matched.
    pub passed: bool,
    /// Submitted answers by item name.
    pub answers: IndexMap<QuestionName, String>,
    pub rt: Option<u64>,
}

/// One completed questionnaire block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestionnaireRecord {
    pub questionnaire_name: QuestionnaireName,
    pub responses: serde_json::Value,
    pub rt: Option<u64>,
}

/// Run-level setup problem (for example an empty manifest).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SetupFailure {
    pub message: String,
}

/// Every row appended to the primary response store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trial_type", rename_all = "snake_case")]
pub enum DataRow {
    Demographics(ParticipantProfile),
    Screen(ScreenRecord),
    Comprehension(ComprehensionRecord),
    BuildPlan(PlanRecord),
    Preview(PreviewRecord),
    Rating(RatingRecord),
    ComputeFamiliar(FamiliarRecord),
    ComputeFamiliarFallback(FamiliarRecord),
    ComputeFamiliarFailed(FamiliarRecord),
    DebugFamiliarFailed(ScreenRecord),
    FatalCategoryCount(CountViolation),
    Preference(PreferenceRecord),
    PreferenceUnavailable(SetFailure),
    Questionnaire(QuestionnaireRecord),
    SetupError(SetupFailure),
}

impl DataRow {
    /// Normalized set key of rows that belong to a set.
    pub fn normalized_category(&self) -> Option<&str> {
        match self {
            DataRow::Preview(row) => Some(&row.normalized_category),
            DataRow::Rating(row) => Some(&row.normalized_category),
            DataRow::Preference(row) => Some(&row.normalized_category),
            DataRow::ComputeFamiliar(row)
            | DataRow::ComputeFamiliarFallback(row)
            | DataRow::ComputeFamiliarFailed(row) => Some(&row.normalized_category),
            DataRow::PreferenceUnavailable(row) => Some(&row.normalized_category),
            DataRow::Screen(row) | DataRow::DebugFamiliarFailed(row) => {
                row.normalized_category.as_deref()
            }
            _ => None,
        }
    }

    /// Rating payload, if this is a rating row.
    pub fn as_rating(&self) -> Option<&RatingRecord> {
        match self {
            DataRow::Rating(row) => Some(row),
            _ => None,
        }
    }

    /// Preference payload, if this is a preference row.
    pub fn as_preference(&self) -> Option<&PreferenceRecord> {
        match self {
            DataRow::Preference(row) => Some(row),
            _ => None,
        }
    }

    /// `trial_type` tag written for this row.
    pub fn trial_type(&self) -> &'static str {
        match self {
            DataRow::Demographics(_) => "demographics",
            DataRow::Screen(_) => "screen",
            DataRow::Comprehension(_) => "comprehension",
            DataRow::BuildPlan(_) => "build_plan",
            DataRow::Preview(_) => "preview",
            DataRow::Rating(_) => "rating",
            DataRow::ComputeFamiliar(_) => "compute_familiar",
            DataRow::ComputeFamiliarFallback(_) => "compute_familiar_fallback",
            DataRow::ComputeFamiliarFailed(_) => "compute_familiar_failed",
            DataRow::DebugFamiliarFailed(_) => "debug_familiar_failed",
            DataRow::FatalCategoryCount(_) => "fatal_category_count",
            DataRow::Preference(_) => "preference",
            DataRow::PreferenceUnavailable(_) => "preference_unavailable",
            DataRow::Questionnaire(_) => "questionnaire",
            DataRow::SetupError(_) => "setup_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stimulus(src: &str) -> StimulusRecord {
        StimulusRecord {
            src: src.to_string(),
            label: src.to_string(),
            category: Category::Geometry,
            set: Some("Simple-symmetric".to_string()),
        }
    }

    #[test]
    fn category_parse_accepts_loose_spellings() {
        assert_eq!(Category::parse(" Face "), Some(Category::Face));
        assert_eq!(Category::parse("Natural Scene"), Some(Category::NaturalScene));
        assert_eq!(Category::parse("natural-scene"), Some(Category::NaturalScene));
        assert_eq!(Category::parse("animals"), None);
    }

    #[test]
    fn block_drops_duplicate_sources_and_rejects_empty() {
        let block = Block::new(
            Category::Geometry,
            "Simple-symmetric",
            vec![stimulus("a.png"), stimulus("b.png"), stimulus("a.png")],
        )
        .expect("block");
        let srcs: Vec<&str> = block.stimuli().iter().map(|s| s.src.as_str()).collect();
        assert_eq!(srcs, vec!["a.png", "b.png"]);
        assert!(Block::new(Category::Geometry, "empty", Vec::new()).is_none());
    }

    #[test]
    fn block_tag_normalizes_set_id() {
        let block = Block::new(Category::Face, " Male-Asian-adult-neutral", vec![stimulus("a")])
            .expect("block");
        assert_eq!(block.tag().normalized_category, "male-asian-adult-neutral");
        assert_eq!(
            block.tag().key(),
            SetKey::new(Category::Face, "male-asian-adult-neutral")
        );
    }

    #[test]
    fn set_keys_differ_across_categories() {
        let geometry = SetKey::new(Category::Geometry, "__root");
        let scenes = SetKey::new(Category::NaturalScene, " __ROOT ");
        assert_eq!(geometry.set, scenes.set);
        assert_ne!(geometry, scenes);
        assert_eq!(scenes.to_string(), "natural_scene/__root");
    }

    #[test]
    fn preference_trial_reports_sides() {
        let trial = PreferenceTrial {
            familiar: FamiliarSelection {
                src: "fam.png".into(),
                label: "fam".into(),
                set_id: "s".into(),
                rating: Some(6.0),
            },
            novel: stimulus("novel.png"),
            familiar_on_left: false,
        };
        assert_eq!(trial.familiar_side(), Side::Right);
        assert_eq!(trial.novel_side(), Side::Left);
        assert_eq!(trial.left().0, "novel.png");
        assert_eq!(trial.right().0, "fam.png");
    }

    #[test]
    fn data_row_serializes_with_trial_type_tag() {
        let row = DataRow::FatalCategoryCount(CountViolation {
            set_id: "tiny".into(),
            category: Category::Geometry,
            required: 37,
            available: 12,
        });
        let json = serde_json::to_value(&row).expect("json");
        assert_eq!(json["trial_type"], "fatal_category_count");
        assert_eq!(json["available"], 12);
        assert_eq!(row.trial_type(), "fatal_category_count");
        let back: DataRow = serde_json::from_value(json).expect("round trip");
        assert_eq!(back, row);
    }
}
