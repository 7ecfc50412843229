//! Step descriptors and the two-phase presentation contract.
//!
//! A [`Step`] is an entry in the run timeline. When it becomes live the
//! session resolves it into a [`Presentation`] (what to show and what
//! response is acceptable). The runner answers with a [`Response`], which
//! is validated against the presentation's [`ResponseConstraint`] before
//! any record is derived.

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::constants::keys::SPACE;
use crate::constants::sequencer::{
    PREFERENCE_LABELS, PREFERENCE_MAX, PREFERENCE_MIN, PREFERENCE_START, PREFERENCE_STEP,
    RATING_LABELS, RATING_MAX, RATING_MIN, RATING_START, RATING_STEP, SLIDER_EPSILON,
};
use crate::data::{ParticipantProfile, SetTag, StimulusRecord};
use crate::questionnaire::QuestionnaireBlock;
use crate::types::QuestionName;

/// Timeline entry.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// Demographics form (external); its response carries the profile.
    Demographics,
    /// Welcome screen describing the task.
    Welcome,
    /// Comprehension gate; stays live until both answers are correct.
    Comprehension,
    /// Internal: build the plan and append set stages.
    BuildPlan,
    /// Category/set header.
    SetIntro {
        set: SetTag,
        preview_count: usize,
        novel_count: usize,
    },
    /// Preview instructions.
    PreviewInstructions { set: SetTag },
    /// Timed preview of one stimulus.
    Preview {
        set: SetTag,
        stimulus: StimulusRecord,
        duration_ms: u64,
    },
    /// Rating instructions.
    RatingInstructions { set: SetTag },
    /// Rating slider for one stimulus.
    Rating { set: SetTag, stimulus: StimulusRecord },
    /// Internal: pick the familiar image; carries the positional fallback.
    ComputeFamiliar {
        set: SetTag,
        fallback: Option<StimulusRecord>,
    },
    /// Diagnostic screen, only entered when familiar computation failed.
    FamiliarDebug { set: SetTag },
    /// Preference instructions (names the familiar image).
    PreferenceInstructions { set: SetTag },
    /// Timed fixation cross before a preference trial.
    Fixation { set: SetTag, duration_ms: u64 },
    /// Familiar vs. novel comparison.
    Preference { set: SetTag, novel: StimulusRecord },
    /// Per-set notice shown in place of the preference stage when no
    /// familiar image exists.
    PreferenceUnavailable { set: SetTag, message: String },
    /// Terminal screen for a set that failed the minimum-count guard.
    FatalCount {
        set: SetTag,
        required: usize,
        available: usize,
    },
    /// One block of the opaque questionnaire suite.
    Questionnaire { block: QuestionnaireBlock },
    /// Closing screen.
    Outro,
    /// Run-level setup error (for example an empty manifest).
    SetupError { message: String },
}

impl Step {
    /// Kind tag of this step.
    pub fn kind(&self) -> StepKind {
        match self {
            Step::Demographics => StepKind::Demographics,
            Step::Welcome => StepKind::Welcome,
            Step::Comprehension => StepKind::Comprehension,
            Step::BuildPlan => StepKind::BuildPlan,
            Step::SetIntro { .. } => StepKind::SetIntro,
            Step::PreviewInstructions { .. } => StepKind::PreviewInstructions,
            Step::Preview { .. } => StepKind::Preview,
            Step::RatingInstructions { .. } => StepKind::RatingInstructions,
            Step::Rating { .. } => StepKind::Rating,
            Step::ComputeFamiliar { .. } => StepKind::ComputeFamiliar,
            Step::FamiliarDebug { .. } => StepKind::FamiliarDebug,
            Step::PreferenceInstructions { .. } => StepKind::PreferenceInstructions,
            Step::Fixation { .. } => StepKind::Fixation,
            Step::Preference { .. } => StepKind::Preference,
            Step::PreferenceUnavailable { .. } => StepKind::PreferenceUnavailable,
            Step::FatalCount { .. } => StepKind::FatalCount,
            Step::Questionnaire { .. } => StepKind::Questionnaire,
            Step::Outro => StepKind::Outro,
            Step::SetupError { .. } => StepKind::SetupError,
        }
    }

    /// Set this step belongs to, if any.
    pub fn set(&self) -> Option<&SetTag> {
        match self {
            Step::SetIntro { set, .. }
            | Step::PreviewInstructions { set }
            | Step::Preview { set, .. }
            | Step::RatingInstructions { set }
            | Step::Rating { set, .. }
            | Step::ComputeFamiliar { set, .. }
            | Step::FamiliarDebug { set }
            | Step::PreferenceInstructions { set }
            | Step::Fixation { set, .. }
            | Step::Preference { set, .. }
            | Step::PreferenceUnavailable { set, .. }
            | Step::FatalCount { set, .. } => Some(set),
            _ => None,
        }
    }
}

/// Fieldless step tag, used in errors, presentations, and counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Demographics,
    Welcome,
    Comprehension,
    BuildPlan,
    SetIntro,
    PreviewInstructions,
    Preview,
    RatingInstructions,
    Rating,
    ComputeFamiliar,
    FamiliarDebug,
    PreferenceInstructions,
    Fixation,
    Preference,
    PreferenceUnavailable,
    FatalCount,
    Questionnaire,
    Outro,
    SetupError,
}

impl StepKind {
    /// snake_case name, matching the screen names written to the store.
    pub const fn as_str(&self) -> &'static str {
        match self {
            StepKind::Demographics => "demographics",
            StepKind::Welcome => "intro",
            StepKind::Comprehension => "comprehension",
            StepKind::BuildPlan => "build_plan",
            StepKind::SetIntro => "category_intro",
            StepKind::PreviewInstructions => "preview_instructions",
            StepKind::Preview => "preview",
            StepKind::RatingInstructions => "rating_instructions",
            StepKind::Rating => "rating",
            StepKind::ComputeFamiliar => "compute_familiar",
            StepKind::FamiliarDebug => "debug_familiar_failed",
            StepKind::PreferenceInstructions => "preference_instructions",
            StepKind::Fixation => "preference_fixation",
            StepKind::Preference => "preference",
            StepKind::PreferenceUnavailable => "preference_unavailable",
            StepKind::FatalCount => "fatal_category_count",
            StepKind::Questionnaire => "questionnaire",
            StepKind::Outro => "outro",
            StepKind::SetupError => "setup_error",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image reference handed to the runner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub src: String,
    pub label: String,
}

/// What the runner should display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScreenContent {
    /// Titled text screen.
    Text { title: String, lines: Vec<String> },
    /// Single image.
    Image { image: ImageRef },
    /// Two images side by side.
    Pair { left: ImageRef, right: ImageRef },
    /// Fixation cross.
    Fixation,
    /// Demographics form (rendered externally).
    DemographicsForm,
    /// Multiple-choice comprehension check.
    Comprehension { questions: Vec<ChoiceQuestion> },
    /// Opaque questionnaire block.
    Questionnaire { name: String, payload: serde_json::Value },
}

/// A multiple-choice item as presented.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceQuestion {
    pub name: QuestionName,
    pub prompt: String,
    pub options: Vec<String>,
}

/// Keys that advance a keyboard step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyChoice {
    /// Only the space bar.
    Space,
    /// Any key.
    Any,
}

/// Slider geometry and rules.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SliderSpec {
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub start: f64,
    pub require_movement: bool,
    pub labels: Vec<String>,
}

impl SliderSpec {
    /// Attractiveness rating slider: 1..=7 in 0.05 steps, starting at 4.
    pub fn rating() -> Self {
        Self {
            min: RATING_MIN,
            max: RATING_MAX,
            step: RATING_STEP,
            start: RATING_START,
            require_movement: true,
            labels: RATING_LABELS.iter().map(|label| label.to_string()).collect(),
        }
    }

    /// Preference slider: -3 (left) ..= 3 (right) in whole steps, starting at 0.
    pub fn preference() -> Self {
        Self {
            min: PREFERENCE_MIN,
            max: PREFERENCE_MAX,
            step: PREFERENCE_STEP,
            start: PREFERENCE_START,
            require_movement: true,
            labels: PREFERENCE_LABELS
                .iter()
                .map(|label| label.to_string())
                .collect(),
        }
    }

    /// Check a submitted value against range, grid, and movement rules.
    pub fn check(&self, value: f64, moved: bool) -> Result<(), String> {
        if !value.is_finite() {
            return Err(format!("slider value {value} is not finite"));
        }
        if value < self.min - SLIDER_EPSILON || value > self.max + SLIDER_EPSILON {
            return Err(format!(
                "slider value {value} outside [{}, {}]",
                self.min, self.max
            ));
        }
        let steps = (value - self.min) / self.step;
        if (steps - steps.round()).abs() > SLIDER_EPSILON * 1e3 {
            return Err(format!(
                "slider value {value} is not on the {} step grid",
                self.step
            ));
        }
        if self.require_movement && !moved {
            return Err("slider must be moved before continuing".to_string());
        }
        Ok(())
    }
}

/// Response the runner must collect before the step can finalize.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseConstraint {
    /// Auto-advance after the duration; answered with [`ResponseValue::Timeout`].
    Timed { duration_ms: u64 },
    /// Keyboard press.
    Key { choice: KeyChoice },
    /// Slider value.
    Slider { slider: SliderSpec },
    /// Completed demographics form.
    Profile,
    /// One answer per listed item.
    Choice { names: Vec<QuestionName> },
    /// Arbitrary questionnaire answers.
    Survey,
}

impl ResponseConstraint {
    /// Validate a response value; the error explains the mismatch.
    pub fn check(&self, value: &ResponseValue) -> Result<(), String> {
        match (self, value) {
            (ResponseConstraint::Timed { .. }, ResponseValue::Timeout) => Ok(()),
            (ResponseConstraint::Key { choice }, ResponseValue::Key { key }) => match choice {
                KeyChoice::Any => Ok(()),
                KeyChoice::Space if key == SPACE => Ok(()),
                KeyChoice::Space => Err(format!("expected the space bar, got '{key}'")),
            },
            (ResponseConstraint::Slider { slider }, ResponseValue::Slider { value, moved }) => {
                slider.check(*value, *moved)
            }
            (ResponseConstraint::Profile, ResponseValue::Profile(_)) => Ok(()),
            (ResponseConstraint::Choice { names }, ResponseValue::Choice(answers)) => {
                match names.iter().find(|name| !answers.contains_key(*name)) {
                    Some(missing) => Err(format!("missing answer for '{missing}'")),
                    None => Ok(()),
                }
            }
            (ResponseConstraint::Survey, ResponseValue::Survey(_)) => Ok(()),
            (constraint, value) => Err(format!(
                "response {} does not satisfy {}",
                value.describe(),
                constraint.describe()
            )),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            ResponseConstraint::Timed { .. } => "a timed step",
            ResponseConstraint::Key { .. } => "a key press",
            ResponseConstraint::Slider { .. } => "a slider",
            ResponseConstraint::Profile => "a demographics form",
            ResponseConstraint::Choice { .. } => "a multiple-choice check",
            ResponseConstraint::Survey => "a questionnaire",
        }
    }
}

/// A live step, ready to render.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Presentation {
    /// Kind of step being shown.
    pub kind: StepKind,
    /// Set the step belongs to, if any.
    pub set: Option<SetTag>,
    /// What to display.
    pub content: ScreenContent,
    /// What counts as a valid response.
    pub constraint: ResponseConstraint,
    /// When the step became live.
    pub utc_start: DateTime<Utc>,
}

/// Raw value collected by the runner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ResponseValue {
    /// A timed step elapsed.
    Timeout,
    /// A key was pressed.
    Key { key: String },
    /// A slider was submitted.
    Slider { value: f64, moved: bool },
    /// The demographics form was submitted.
    Profile(ParticipantProfile),
    /// Multiple-choice answers by item name.
    Choice(IndexMap<QuestionName, String>),
    /// Questionnaire answers.
    Survey(serde_json::Value),
}

impl ResponseValue {
    fn describe(&self) -> &'static str {
        match self {
            ResponseValue::Timeout => "timeout",
            ResponseValue::Key { .. } => "key press",
            ResponseValue::Slider { .. } => "slider value",
            ResponseValue::Profile(_) => "profile",
            ResponseValue::Choice(_) => "choice answers",
            ResponseValue::Survey(_) => "survey answers",
        }
    }
}

/// Participant response plus the response time the runner measured.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub value: ResponseValue,
    pub rt_ms: Option<u64>,
}

impl Response {
    /// Timed step elapsed.
    pub fn timeout() -> Self {
        Self {
            value: ResponseValue::Timeout,
            rt_ms: None,
        }
    }

    /// Key press.
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            value: ResponseValue::Key { key: key.into() },
            rt_ms: None,
        }
    }

    /// Slider submission after the participant moved the handle.
    pub fn slider(value: f64) -> Self {
        Self {
            value: ResponseValue::Slider { value, moved: true },
            rt_ms: None,
        }
    }

    /// Demographics submission.
    pub fn profile(profile: ParticipantProfile) -> Self {
        Self {
            value: ResponseValue::Profile(profile),
            rt_ms: None,
        }
    }

    /// Comprehension answers, given as `(item, answer)` pairs.
    pub fn choices<I, K, V>(answers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<QuestionName>,
        V: Into<String>,
    {
        Self {
            value: ResponseValue::Choice(
                answers
                    .into_iter()
                    .map(|(name, answer)| (name.into(), answer.into()))
                    .collect(),
            ),
            rt_ms: None,
        }
    }

    /// Questionnaire answers.
    pub fn survey(answers: serde_json::Value) -> Self {
        Self {
            value: ResponseValue::Survey(answers),
            rt_ms: None,
        }
    }

    /// Attach a response time.
    pub fn with_rt(mut self, rt_ms: u64) -> Self {
        self.rt_ms = Some(rt_ms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rating_slider() -> SliderSpec {
        SliderSpec::rating()
    }

    #[test]
    fn slider_accepts_grid_values_and_rejects_out_of_range() {
        let slider = rating_slider();
        assert!(slider.check(1.0, true).is_ok());
        assert!(slider.check(6.35, true).is_ok());
        assert!(slider.check(7.0, true).is_ok());
        assert!(slider.check(7.05, true).is_err());
        assert!(slider.check(0.5, true).is_err());
        assert!(slider.check(f64::NAN, true).is_err());
    }

    #[test]
    fn slider_requires_movement() {
        assert!(rating_slider().check(4.0, false).is_err());
    }

    #[test]
    fn preference_slider_rejects_fractional_values() {
        let slider = SliderSpec::preference();
        assert_eq!(slider.labels.len(), 7);
        assert!(slider.check(-2.0, true).is_ok());
        assert!(slider.check(0.5, true).is_err());
    }

    #[test]
    fn key_constraint_distinguishes_space_and_any() {
        let space = ResponseConstraint::Key {
            choice: KeyChoice::Space,
        };
        assert!(space.check(&Response::key(" ").value).is_ok());
        assert!(space.check(&Response::key("x").value).is_err());
        let any = ResponseConstraint::Key {
            choice: KeyChoice::Any,
        };
        assert!(any.check(&Response::key("x").value).is_ok());
    }

    #[test]
    fn mismatched_response_type_is_rejected() {
        let timed = ResponseConstraint::Timed { duration_ms: 750 };
        let err = timed.check(&Response::slider(3.0).value).unwrap_err();
        assert!(err.contains("timed step"));
    }

    #[test]
    fn choice_constraint_requires_every_item() {
        let constraint = ResponseConstraint::Choice {
            names: vec!["q1".into(), "q2".into()],
        };
        assert!(constraint.check(&Response::choices([("q1", "a")]).value).is_err());
        assert!(
            constraint
                .check(&Response::choices([("q1", "a"), ("q2", "b")]).value)
                .is_ok()
        );
    }
}
