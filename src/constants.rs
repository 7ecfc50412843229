use crate::data::Category;

/// Constants used when grouping manifest records.
pub mod index {
    /// Sentinel set id for records that carry no `set` value.
    pub const ROOT_SET_ID: &str = "__root";
}

/// Constants used by plan construction and in-group derivation.
pub mod plan {
    use super::Category;

    /// Categories presented in a run; their order is shuffled per participant.
    pub const PLAN_CATEGORIES: [Category; 3] =
        [Category::Face, Category::Geometry, Category::NaturalScene];
    /// Maximum number of out-group face sets included after the in-group set.
    pub const MAX_OUTGROUP_SETS: usize = 3;
    /// Ages strictly above this value map to the `adult` age group.
    pub const ADULT_AGE_THRESHOLD: u32 = 40;
    /// Race tokens accepted in face set identifiers.
    pub const VALID_RACES: [&str; 4] = ["asian", "black", "latino", "white"];
    /// Gender tokens accepted in face set identifiers.
    pub const GENDER_TOKENS: [&str; 2] = ["Male", "Female"];
    /// Expression suffix shared by every face set identifier.
    pub const FACE_EXPRESSION: &str = "neutral";
    /// Age ranges reported by the demographics form that map to `young_adult`.
    pub const YOUNG_ADULT_AGE_RANGES: [&str; 2] = ["18-24", "25-34"];
    /// Age ranges reported by the demographics form that map to `adult`.
    pub const ADULT_AGE_RANGES: [&str; 4] = ["35-44", "45-54", "55-64", "65+"];
}

/// Constants used when expanding a block into its stage sequence.
pub mod sequencer {
    /// Stimuli previewed and rated per set.
    pub const PREVIEW_COUNT: usize = 19;
    /// Novel stimuli compared against the familiar image per set.
    pub const NOVEL_COUNT: usize = 18;
    /// Minimum unique stimuli a set needs before it can be expanded.
    pub const MIN_SET_SIZE: usize = PREVIEW_COUNT + NOVEL_COUNT;
    /// Exposure duration of each preview screen.
    pub const PREVIEW_DURATION_MS: u64 = 750;
    /// Duration of the fixation cross shown before each preference trial.
    pub const FIXATION_DURATION_MS: u64 = 700;
    /// Rating slider lower bound.
    pub const RATING_MIN: f64 = 1.0;
    /// Rating slider upper bound.
    pub const RATING_MAX: f64 = 7.0;
    /// Rating slider granularity.
    pub const RATING_STEP: f64 = 0.05;
    /// Rating slider resting position.
    pub const RATING_START: f64 = 4.0;
    /// Preference slider lower bound (strongly prefer left).
    pub const PREFERENCE_MIN: f64 = -3.0;
    /// Preference slider upper bound (strongly prefer right).
    pub const PREFERENCE_MAX: f64 = 3.0;
    /// Preference slider granularity.
    pub const PREFERENCE_STEP: f64 = 1.0;
    /// Preference slider resting position.
    pub const PREFERENCE_START: f64 = 0.0;
    /// Tolerance used when checking slider values against their step grid.
    pub const SLIDER_EPSILON: f64 = 1e-6;
    /// Labels shown beneath the rating slider.
    pub const RATING_LABELS: [&str; 7] = [
        "1 Not at all attractive",
        "2 Barely attractive",
        "3 Weakly attractive",
        "4 Neutral attractive",
        "5 Moderately attractive",
        "6 Very attractive",
        "7 Extremely attractive",
    ];
    /// Labels shown beneath the preference slider.
    pub const PREFERENCE_LABELS: [&str; 7] = [
        "-3 Strongly prefer left",
        "-2 Moderately prefer left",
        "-1 Slightly prefer left",
        "0 No preference",
        "+1 Slightly prefer right",
        "+2 Moderately prefer right",
        "+3 Strongly prefer right",
    ];
}

/// Constants used by familiar-image selection.
pub mod familiar {
    /// Zero-based rank of the familiar image in the ratings-sorted order.
    pub const FAMILIAR_RANK_INDEX: usize = 9;
    /// Number of rating rows shown on the familiar debug screen.
    pub const DEBUG_SAMPLE_ROWS: usize = 3;
    /// Number of trailing store rows shown on the familiar debug screen.
    pub const DEBUG_TAIL_ROWS: usize = 5;
}

/// Constants used by the comprehension gate.
pub mod gate {
    /// Name of the first comprehension item.
    pub const Q1_NAME: &str = "q1";
    /// Name of the second comprehension item.
    pub const Q2_NAME: &str = "q2";
    /// Substring the correct answer to the first item must contain.
    pub const Q1_EXPECTED: &str = "earlier ratings";
    /// Substring the correct answer to the second item must contain.
    pub const Q2_EXPECTED: &str = "extreme values";
    /// Notice shown before the instructions restart.
    pub const FAILURE_NOTICE: &str =
        "At least one answer was incorrect. Please read the instructions again carefully.";
}

/// Keys recognized in run-scoping query strings.
pub mod params {
    /// Restrict the plan to one category.
    pub const ONLY_CATEGORY: &str = "only_category";
    /// Restrict the plan to one set.
    pub const ONLY_SET: &str = "only_set";
    /// Skip set expansion and run only the questionnaire suite.
    pub const TEST_QUESTIONNAIRE: &str = "test_questionnaire";
    /// Participant id supplied by the recruitment platform.
    pub const PROLIFIC_PID: &str = "PROLIFIC_PID";
    /// Study id supplied by the recruitment platform.
    pub const STUDY_ID: &str = "STUDY_ID";
    /// Session id supplied by the recruitment platform.
    pub const SESSION_ID: &str = "SESSION_ID";
    /// Completion code used to build the return URL.
    pub const COMPLETION_CODE: &str = "cc";
}

/// Constants used when assembling the submission payload.
pub mod payload {
    /// Base URL participants are returned to after finishing.
    pub const COMPLETION_URL_BASE: &str = "https://app.prolific.com/submissions/complete?cc=";
}

/// Keys the presentation runner reports for keyboard steps.
pub mod keys {
    /// Space bar, required to leave instruction screens.
    pub const SPACE: &str = " ";
}

/// Constants used by deterministic randomness.
pub mod rng {
    /// Offset mixed into participant-derived seeds.
    pub const PARTICIPANT_SEED_OFFSET: u64 = 0xB4C3_5EED;
    /// SplitMix64 state increment.
    pub const SPLITMIX_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;
}
