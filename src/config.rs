use crate::constants::familiar::FAMILIAR_RANK_INDEX;
use crate::constants::gate::{FAILURE_NOTICE, Q1_EXPECTED, Q1_NAME, Q2_EXPECTED, Q2_NAME};
use crate::constants::params::{
    COMPLETION_CODE, ONLY_CATEGORY, ONLY_SET, PROLIFIC_PID, SESSION_ID, STUDY_ID,
    TEST_QUESTIONNAIRE,
};
use crate::constants::plan::{ADULT_AGE_THRESHOLD, MAX_OUTGROUP_SETS};
use crate::constants::sequencer::{
    FIXATION_DURATION_MS, NOVEL_COUNT, PREVIEW_COUNT, PREVIEW_DURATION_MS,
};
use crate::errors::EngineError;
use crate::types::{ParticipantId, QuestionName};
use crate::utils::decode_query_component;

/// What to do when a profile field needed for the in-group set is missing
/// or unrecognized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProfileFallback {
    /// Sample the missing field uniformly from its valid values.
    #[default]
    Sample,
    /// Leave the in-group unresolved; the face plan becomes out-group only.
    Strict,
}

/// Controls how the plan is drawn from the stimulus index.
#[derive(Clone, Debug)]
pub struct PlanConfig {
    /// Maximum number of out-group face sets.
    pub max_outgroup_sets: usize,
    /// Ages strictly above this value count as `adult`.
    pub adult_age_threshold: u32,
    /// Handling of missing or unrecognized profile fields.
    pub profile_fallback: ProfileFallback,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            max_outgroup_sets: MAX_OUTGROUP_SETS,
            adult_age_threshold: ADULT_AGE_THRESHOLD,
            profile_fallback: ProfileFallback::default(),
        }
    }
}

/// Controls how a block expands into stages.
#[derive(Clone, Debug)]
pub struct SequencerConfig {
    /// Stimuli previewed and rated per set.
    pub preview_count: usize,
    /// Novel stimuli compared against the familiar image.
    pub novel_count: usize,
    /// Zero-based rank of the familiar image among sorted ratings.
    pub familiar_rank: usize,
    /// Exposure of each preview screen.
    pub preview_duration_ms: u64,
    /// Duration of each fixation cross.
    pub fixation_duration_ms: u64,
}

impl SequencerConfig {
    /// Unique stimuli a set needs to be expanded.
    pub fn min_set_size(&self) -> usize {
        self.preview_count + self.novel_count
    }
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            preview_count: PREVIEW_COUNT,
            novel_count: NOVEL_COUNT,
            familiar_rank: FAMILIAR_RANK_INDEX,
            preview_duration_ms: PREVIEW_DURATION_MS,
            fixation_duration_ms: FIXATION_DURATION_MS,
        }
    }
}

/// One multiple-choice comprehension item.
#[derive(Clone, Debug)]
pub struct ComprehensionQuestion {
    /// Item name used as the answer key.
    pub name: QuestionName,
    /// Question text.
    pub prompt: String,
    /// Answer options, shown in order.
    pub options: Vec<String>,
    /// Substring the chosen option must contain to count as correct.
    pub expected: String,
}

/// One instruction screen shown before the comprehension check.
#[derive(Clone, Debug)]
pub struct InstructionPage {
    pub title: String,
    pub lines: Vec<String>,
}

/// Content of the comprehension gate.
#[derive(Clone, Debug)]
pub struct ComprehensionConfig {
    /// Instruction screens repeated on every attempt.
    pub pages: Vec<InstructionPage>,
    /// The two items that must both be answered correctly.
    pub questions: [ComprehensionQuestion; 2],
    /// Notice shown before the instructions restart.
    pub failure_notice: String,
}

impl Default for ComprehensionConfig {
    fn default() -> Self {
        Self {
            pages: vec![
                InstructionPage {
                    title: "How the task works".into(),
                    lines: vec![
                        "Each image set has three parts: preview, rating, and preference.".into(),
                        "Preview: images appear briefly so you know what is coming.".into(),
                        "Rating: move the slider from 1 to 7 to show how attractive each image is."
                            .into(),
                    ],
                },
                InstructionPage {
                    title: "Preference judgments".into(),
                    lines: vec![
                        "One familiar image, picked from your earlier ratings, is paired with a new image."
                            .into(),
                        "Move the slider left or right to show which image you prefer and how strongly."
                            .into(),
                        "Use the whole scale, including the extreme values, whenever they match how you feel."
                            .into(),
                    ],
                },
            ],
            questions: [
                ComprehensionQuestion {
                    name: Q1_NAME.into(),
                    prompt: "Where does the familiar image in the preference trials come from?".into(),
                    options: vec![
                        "It is a new image you have never seen.".into(),
                        "It is chosen from your earlier ratings in the same set.".into(),
                        "It is the same image for every set.".into(),
                    ],
                    expected: Q1_EXPECTED.into(),
                },
                ComprehensionQuestion {
                    name: Q2_NAME.into(),
                    prompt: "How should you use the preference slider?".into(),
                    options: vec![
                        "Always keep it close to the middle.".into(),
                        "Use the whole scale, including extreme values when they match your preference."
                            .into(),
                        "Only ever choose the left image.".into(),
                    ],
                    expected: Q2_EXPECTED.into(),
                },
            ],
            failure_notice: FAILURE_NOTICE.into(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// RNG seed that controls plan and trial order.
    pub seed: u64,
    /// Mix the participant id into the seed when one is known.
    pub seed_per_participant: bool,
    /// Plan construction settings.
    pub plan: PlanConfig,
    /// Per-set expansion settings.
    pub sequencer: SequencerConfig,
    /// Comprehension gate content.
    pub comprehension: ComprehensionConfig,
}

impl EngineConfig {
    /// Reject settings the sequencer cannot honor.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.sequencer.preview_count == 0 {
            return Err(EngineError::Configuration(
                "preview_count must be greater than zero".to_string(),
            ));
        }
        if self.sequencer.novel_count == 0 {
            return Err(EngineError::Configuration(
                "novel_count must be greater than zero".to_string(),
            ));
        }
        for question in &self.comprehension.questions {
            if question.expected.is_empty() {
                return Err(EngineError::Configuration(format!(
                    "comprehension item '{}' has an empty expected answer",
                    question.name
                )));
            }
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            seed_per_participant: true,
            plan: PlanConfig::default(),
            sequencer: SequencerConfig::default(),
            comprehension: ComprehensionConfig::default(),
        }
    }
}

/// Run-scoping parameters taken from the study URL.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunParams {
    /// Keep only blocks of this category (normalized match).
    pub only_category: Option<String>,
    /// Keep only blocks of this set (normalized match).
    pub only_set: Option<String>,
    /// Skip set expansion and run only the questionnaire suite.
    pub test_questionnaire: bool,
    /// Participant id from the recruitment platform.
    pub prolific_pid: Option<ParticipantId>,
    /// Study id from the recruitment platform.
    pub study_id: Option<String>,
    /// Session id from the recruitment platform.
    pub session_id: Option<String>,
    /// Completion code for the return URL.
    pub completion_code: Option<String>,
}

impl RunParams {
    /// Parse a query string such as `?only_category=face&PROLIFIC_PID=abc`.
    ///
    /// Unknown keys are ignored; later duplicates win.
    pub fn from_query(query: &str) -> Self {
        let mut params = RunParams::default();
        let query = query.trim_start_matches('?');
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = decode_query_component(raw_key);
            let value = decode_query_component(raw_value);
            match key.as_str() {
                ONLY_CATEGORY => params.only_category = non_empty(value),
                ONLY_SET => params.only_set = non_empty(value),
                TEST_QUESTIONNAIRE => params.test_questionnaire = is_flag_value(&value),
                PROLIFIC_PID => params.prolific_pid = non_empty(value),
                STUDY_ID => params.study_id = non_empty(value),
                SESSION_ID => params.session_id = non_empty(value),
                COMPLETION_CODE => params.completion_code = non_empty(value),
                _ => {}
            }
        }
        params
    }
}

/// A present flag is on when its value is empty, `1`, or `true` (any case).
pub fn is_flag_value(value: &str) -> bool {
    value.is_empty() || value == "1" || value.eq_ignore_ascii_case("true")
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
