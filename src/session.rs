//! Run orchestration over the two-phase step contract.
//!
//! Ownership model:
//! - `Session` owns the timeline and the single live step.
//! - `RunContext` owns all mutable run state (RNG, primary store, response
//!   cache, familiar-by-set map, profile). Nothing is global; one context
//!   exists per run.
//!
//! `present` resolves the next step (running internal steps such as plan
//! building and familiar computation inline) and suspends on the first
//! step that needs a participant response. `finalize` validates that
//! response, commits the derived rows, and advances.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::cache::ResponseCache;
use crate::config::{EngineConfig, RunParams};
use crate::constants::familiar::{DEBUG_SAMPLE_ROWS, DEBUG_TAIL_ROWS};
use crate::data::{
    Category, ComprehensionRecord, CountViolation, DataRow, FamiliarOutcome, FamiliarRecord,
    FamiliarSelection, FamiliarSource, ParticipantProfile, PreferenceRecord, PreferenceTrial,
    PreviewRecord, QuestionnaireRecord, RatingRecord, ScreenRecord, SetFailure, SetKey,
    SetTag, SetupFailure, StimulusRecord,
};
use crate::errors::EngineError;
use crate::gate::{ComprehensionGate, GateEvent};
use crate::payload::{SubmissionPayload, completion_url};
use crate::plan::PlanBuilder;
use crate::questionnaire::QuestionnaireBlock;
use crate::index::StimulusIndex;
use crate::rng::DeterministicRng;
use crate::sequencer::SetSequencer;
use crate::step::{
    ImageRef, KeyChoice, Presentation, Response, ResponseConstraint, ResponseValue,
    ScreenContent, SliderSpec, Step, StepKind,
};
use crate::store::{InMemoryResponseStore, ResponseStore};

/// Familiar outcomes keyed by category and normalized set id, owned by one run.
pub type FamiliarMap = IndexMap<SetKey, FamiliarOutcome>;

/// Mutable state threaded through every step of a run.
#[derive(Debug)]
pub struct RunContext<R, S> {
    rng: R,
    store: S,
    cache: ResponseCache,
    familiars: FamiliarMap,
    profile: ParticipantProfile,
}

impl<R: Rng, S: ResponseStore> RunContext<R, S> {
    fn new(rng: R, store: S) -> Self {
        Self {
            rng,
            store,
            cache: ResponseCache::new(),
            familiars: FamiliarMap::new(),
            profile: ParticipantProfile::default(),
        }
    }

    /// Familiar image selected for `set`, if one exists.
    pub fn familiar(&self, set: &SetTag) -> Option<&FamiliarSelection> {
        self.familiars
            .get(&set.key())
            .and_then(|outcome| outcome.selection.as_ref())
    }

    /// Append a row to the primary store; ratings are mirrored to the cache
    /// first. A store failure is logged and the run continues.
    fn commit(&mut self, row: DataRow) {
        if let DataRow::Rating(rating) = &row {
            self.cache.push(rating.clone());
            debug!(
                set = %rating.normalized_category,
                label = %rating.stimulus_label,
                rating = rating.rating,
                "rating written"
            );
        }
        let trial_type = row.trial_type();
        if let Err(err) = self.store.append(row) {
            warn!(trial_type, error = %err, "primary store write failed");
        }
    }
}

struct LiveStep {
    step: Step,
    presentation: Presentation,
    trial: Option<PreferenceTrial>,
}

/// One participant's run from demographics to outro.
pub struct Session<R = DeterministicRng, S = InMemoryResponseStore> {
    config: EngineConfig,
    params: RunParams,
    index: StimulusIndex,
    questionnaires: Vec<QuestionnaireBlock>,
    sequencer: SetSequencer,
    gate: ComprehensionGate,
    context: RunContext<R, S>,
    pending: VecDeque<Step>,
    live: Option<LiveStep>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl Session<DeterministicRng, InMemoryResponseStore> {
    /// Session backed by an in-memory store and a [`DeterministicRng`].
    ///
    /// The seed is `config.seed`, mixed with the participant id when one is
    /// known and `config.seed_per_participant` is set.
    pub fn in_memory(
        config: EngineConfig,
        params: RunParams,
        manifest: Vec<StimulusRecord>,
        questionnaires: Vec<QuestionnaireBlock>,
    ) -> Result<Self, EngineError> {
        let rng = match params.prolific_pid.as_deref() {
            Some(pid) if config.seed_per_participant => {
                DeterministicRng::for_participant(config.seed, pid)
            }
            _ => DeterministicRng::new(config.seed),
        };
        Self::new(
            config,
            params,
            manifest,
            questionnaires,
            rng,
            InMemoryResponseStore::new(),
        )
    }
}

impl<R: Rng, S: ResponseStore> Session<R, S> {
    /// Create a session over an injected RNG and store.
    ///
    /// An empty manifest is not an error here: the timeline becomes a
    /// single setup-error notice.
    pub fn new(
        config: EngineConfig,
        params: RunParams,
        manifest: Vec<StimulusRecord>,
        questionnaires: Vec<QuestionnaireBlock>,
        rng: R,
        store: S,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let index = StimulusIndex::build(&manifest);
        let pending: VecDeque<Step> = if index.is_empty() {
            warn!("stimulus manifest is empty; run cannot start");
            VecDeque::from([Step::SetupError {
                message: EngineError::EmptyManifest.to_string(),
            }])
        } else {
            VecDeque::from([
                Step::Demographics,
                Step::Welcome,
                Step::Comprehension,
                Step::BuildPlan,
            ])
        };
        info!(
            stimuli = index.total_records(),
            questionnaires = questionnaires.len(),
            participant = ?params.prolific_pid,
            "session created"
        );
        Ok(Self {
            sequencer: SetSequencer::new(config.sequencer.clone()),
            gate: ComprehensionGate::new(config.comprehension.clone()),
            config,
            params,
            index,
            questionnaires,
            context: RunContext::new(rng, store),
            pending,
            live: None,
            started_at: Utc::now(),
            finished_at: None,
        })
    }

    /// Resolve the live step, or `None` once the run is finished.
    ///
    /// Calling this again before `finalize` returns the same presentation.
    pub fn present(&mut self) -> Result<Option<Presentation>, EngineError> {
        if let Some(live) = &self.live {
            return Ok(Some(live.presentation.clone()));
        }
        loop {
            let Some(step) = self.pending.pop_front() else {
                self.finish();
                return Ok(None);
            };
            match step {
                Step::BuildPlan => {
                    self.build_plan();
                    continue;
                }
                Step::ComputeFamiliar { set, fallback } => {
                    self.compute_familiar(&set, fallback.as_ref());
                    continue;
                }
                Step::FamiliarDebug { ref set } if self.context.familiar(set).is_some() => {
                    continue;
                }
                Step::Comprehension if self.gate.is_complete() => continue,
                Step::PreferenceInstructions { ref set }
                | Step::Fixation { ref set, .. }
                | Step::Preference { ref set, .. }
                    if self.context.familiar(set).is_none() =>
                {
                    let notice = self.abort_preferences(set);
                    self.pending.push_front(notice);
                    continue;
                }
                step => {
                    let trial = self.draw_trial(&step);
                    let (content, constraint) = self.screen(&step, trial.as_ref())?;
                    let presentation = Presentation {
                        kind: step.kind(),
                        set: step.set().cloned(),
                        content,
                        constraint,
                        utc_start: Utc::now(),
                    };
                    self.live = Some(LiveStep {
                        step,
                        presentation: presentation.clone(),
                        trial,
                    });
                    return Ok(Some(presentation));
                }
            }
        }
    }

    /// Validate `response` against the live step, commit the derived rows,
    /// and advance. On an invalid response the step stays live.
    pub fn finalize(&mut self, response: Response) -> Result<Vec<DataRow>, EngineError> {
        let live = self.live.take().ok_or(EngineError::NoLiveStep)?;
        if let Err(details) = live.presentation.constraint.check(&response.value) {
            let step = live.presentation.kind;
            self.live = Some(live);
            return Err(EngineError::InvalidResponse { step, details });
        }
        let rows = match self.derive_rows(&live, &response) {
            Ok(rows) => rows,
            Err(err) => {
                self.live = Some(live);
                return Err(err);
            }
        };
        for row in &rows {
            self.context.commit(row.clone());
        }
        if matches!(live.step, Step::Comprehension) && !self.gate.is_complete() {
            self.pending.push_front(Step::Comprehension);
        }
        Ok(rows)
    }

    fn build_plan(&mut self) {
        let plan = PlanBuilder::new(&self.index, self.config.plan.clone())
            .build(&self.context.profile, &mut self.context.rng)
            .apply_scope(&self.params);
        let record = plan.record(&self.params);
        if self.params.test_questionnaire {
            info!("questionnaire test mode; skipping set stages");
        } else {
            for block in &plan.blocks {
                let steps = self.sequencer.expand(block, &mut self.context.rng);
                self.pending.extend(steps);
            }
        }
        self.pending.extend(
            self.questionnaires
                .iter()
                .cloned()
                .map(|block| Step::Questionnaire { block }),
        );
        self.pending.push_back(Step::Outro);
        let sets: Vec<&str> = record.sets.iter().map(|set| set.set_id.as_str()).collect();
        info!(
            only_category = ?self.params.only_category,
            only_set = ?self.params.only_set,
            sets = ?sets,
            steps = self.pending.len(),
            "plan ready"
        );
        self.context.commit(DataRow::BuildPlan(record));
    }

    fn compute_familiar(&mut self, set: &SetTag, fallback: Option<&StimulusRecord>) {
        let key = set.key();
        let outcome = self.sequencer.selector().resolve(
            set,
            &self.context.store,
            &self.context.cache,
            fallback,
        );
        let rating_count = self
            .context
            .store
            .ratings_for(&key)
            .map(|rows| rows.len())
            .unwrap_or(0);
        let cache_count = self.context.cache.len_for(&key);
        let selection = outcome.selection.as_ref();
        let mut record = FamiliarRecord {
            set_id: set.set_id.clone(),
            category: set.category,
            normalized_category: set.normalized_category.clone(),
            familiar_src: selection.map(|s| s.src.clone()),
            familiar_label: selection.map(|s| s.label.clone()),
            rating_count,
            cache_count,
            message: None,
        };
        let row = match outcome.source {
            FamiliarSource::Ratings => {
                info!(
                    set = %key,
                    familiar = ?record.familiar_label,
                    rating_count,
                    cache_count,
                    "familiar selected from ratings"
                );
                DataRow::ComputeFamiliar(record)
            }
            FamiliarSource::PositionalFallback => {
                record.message = Some("no rating rows found; used preview position".into());
                warn!(
                    set = %key,
                    familiar = ?record.familiar_label,
                    "familiar fallback used"
                );
                DataRow::ComputeFamiliarFallback(record)
            }
            FamiliarSource::Unavailable => {
                record.message = Some("no rating rows and no preview fallback".into());
                warn!(set = %key, rating_count, cache_count, "familiar computation failed");
                DataRow::ComputeFamiliarFailed(record)
            }
        };
        self.context.familiars.insert(key, outcome);
        self.context.commit(row);
    }

    fn abort_preferences(&mut self, set: &SetTag) -> Step {
        let before = self.pending.len();
        self.pending.retain(|step| {
            !(matches!(
                step,
                Step::PreferenceInstructions { .. } | Step::Fixation { .. } | Step::Preference { .. }
            ) && step.set() == Some(set))
        });
        warn!(
            set = %set.set_id,
            skipped = before - self.pending.len(),
            "no familiar image; skipping preference stage"
        );
        Step::PreferenceUnavailable {
            set: set.clone(),
            message: format!(
                "The comparison images for '{}' could not be prepared. Press any key to continue.",
                set.set_label
            ),
        }
    }

    fn draw_trial(&mut self, step: &Step) -> Option<PreferenceTrial> {
        let Step::Preference { set, novel } = step else {
            return None;
        };
        let familiar = self.context.familiar(set)?.clone();
        Some(PreferenceTrial {
            familiar,
            novel: novel.clone(),
            familiar_on_left: self.context.rng.random_bool(0.5),
        })
    }

    fn screen(
        &self,
        step: &Step,
        trial: Option<&PreferenceTrial>,
    ) -> Result<(ScreenContent, ResponseConstraint), EngineError> {
        let space = ResponseConstraint::Key {
            choice: KeyChoice::Space,
        };
        let any_key = ResponseConstraint::Key {
            choice: KeyChoice::Any,
        };
        let screen = match step {
            Step::Demographics => (ScreenContent::DemographicsForm, ResponseConstraint::Profile),
            Step::Welcome => (
                text(
                    "Welcome",
                    [
                        "In this study you will look at sets of images, rate them, and compare pairs.",
                        "Please keep your eyes on the screen for the whole task.",
                        "Press SPACE to read the instructions.",
                    ],
                ),
                space,
            ),
            Step::Comprehension => self.gate.screen(),
            Step::SetIntro {
                set,
                preview_count,
                novel_count,
            } => (
                text(
                    &format!("{}: {}", set.category, set.set_label),
                    [
                        format!("You will briefly see {preview_count} images, then rate each of them."),
                        format!("Afterwards you will compare one of them with {novel_count} new images."),
                        "Press SPACE to begin.".to_string(),
                    ],
                ),
                space,
            ),
            Step::PreviewInstructions { .. } => (
                text(
                    "Preview",
                    [
                        "Images will appear one after another for a short moment.",
                        "Just look at each image. Press SPACE to start.",
                    ],
                ),
                space,
            ),
            Step::Preview {
                stimulus,
                duration_ms,
                ..
            } => (
                ScreenContent::Image {
                    image: image_ref(&stimulus.src, &stimulus.label),
                },
                ResponseConstraint::Timed {
                    duration_ms: *duration_ms,
                },
            ),
            Step::RatingInstructions { .. } => (
                text(
                    "Rating",
                    [
                        "Rate how attractive each image is, from 1 (not at all) to 7 (extremely).",
                        "Move the slider before continuing. Press SPACE to start.",
                    ],
                ),
                space,
            ),
            Step::Rating { stimulus, .. } => (
                ScreenContent::Image {
                    image: image_ref(&stimulus.src, &stimulus.label),
                },
                ResponseConstraint::Slider {
                    slider: SliderSpec::rating(),
                },
            ),
            Step::FamiliarDebug { set } => (
                text("Familiar image unavailable", self.familiar_debug_lines(set)),
                any_key,
            ),
            Step::PreferenceInstructions { set } => {
                let familiar = self
                    .context
                    .familiar(set)
                    .map(|selection| selection.label.clone())
                    .unwrap_or_default();
                (
                    text(
                        "Preference",
                        [
                            format!("Each trial pairs an image you rated earlier ({familiar}) with a new one."),
                            "Move the slider toward the image you prefer: -3 strongly left, +3 strongly right."
                                .to_string(),
                            "Press SPACE to start.".to_string(),
                        ],
                    ),
                    space,
                )
            }
            Step::Fixation { duration_ms, .. } => (
                ScreenContent::Fixation,
                ResponseConstraint::Timed {
                    duration_ms: *duration_ms,
                },
            ),
            Step::Preference { .. } => {
                let trial = trial.ok_or_else(|| EngineError::InvalidResponse {
                    step: StepKind::Preference,
                    details: "no preference trial drawn".into(),
                })?;
                let (left_src, left_label) = trial.left();
                let (right_src, right_label) = trial.right();
                (
                    ScreenContent::Pair {
                        left: image_ref(left_src, left_label),
                        right: image_ref(right_src, right_label),
                    },
                    ResponseConstraint::Slider {
                        slider: SliderSpec::preference(),
                    },
                )
            }
            Step::PreferenceUnavailable { message, .. } => (
                text("Comparison unavailable", [message.as_str()]),
                any_key,
            ),
            Step::FatalCount {
                set,
                required,
                available,
            } => (
                text(
                    "Image set unavailable",
                    [
                        format!("The set '{}' needs {required} images but only {available} were found.", set.set_label),
                        "This set will be skipped. Press any key to continue.".to_string(),
                    ],
                ),
                any_key,
            ),
            Step::Questionnaire { block } => (
                ScreenContent::Questionnaire {
                    name: block.name.clone(),
                    payload: block.payload.clone(),
                },
                ResponseConstraint::Survey,
            ),
            Step::Outro => (
                text(
                    "Thank you",
                    [
                        "You have completed the study.",
                        "Press any key to submit your responses.",
                    ],
                ),
                any_key,
            ),
            Step::SetupError { message } => (text("Setup error", [message.as_str()]), any_key),
            Step::BuildPlan | Step::ComputeFamiliar { .. } => {
                return Err(EngineError::Configuration(format!(
                    "internal step '{}' cannot be presented",
                    step.kind()
                )));
            }
        };
        Ok(screen)
    }

    fn familiar_debug_lines(&self, set: &SetTag) -> Vec<String> {
        let rows = self.context.store.rows();
        let ratings: Vec<&RatingRecord> = rows.iter().filter_map(DataRow::as_rating).collect();
        let matching = ratings
            .iter()
            .filter(|row| {
                row.category == set.category && row.normalized_category == set.normalized_category
            })
            .count();
        let categories: IndexSet<&str> = ratings
            .iter()
            .map(|row| row.normalized_category.as_str())
            .collect();

        let mut lines = vec![
            format!("Target set: {} ({})", set.set_id, set.normalized_category),
            format!("Matching rating rows: {matching}"),
            format!("Total rows: {}", rows.len()),
            format!(
                "Sets in rating rows: {}",
                categories.into_iter().collect::<Vec<_>>().join(", ")
            ),
        ];
        lines.extend(ratings.iter().take(DEBUG_SAMPLE_ROWS).map(|row| {
            format!(
                "rating: {} / {} = {}",
                row.normalized_category, row.stimulus_label, row.rating
            )
        }));
        let tail_start = rows.len().saturating_sub(DEBUG_TAIL_ROWS);
        lines.extend(rows[tail_start..].iter().map(|row| {
            format!(
                "recent: {} {}",
                row.trial_type(),
                row.normalized_category().unwrap_or("-")
            )
        }));
        lines
    }

    fn derive_rows(&mut self, live: &LiveStep, response: &Response) -> Result<Vec<DataRow>, EngineError> {
        let utc_start = live.presentation.utc_start;
        let utc_end = Utc::now();
        let rt = response.rt_ms;
        let row = match &live.step {
            Step::Demographics => {
                let ResponseValue::Profile(profile) = &response.value else {
                    return Err(mismatch(StepKind::Demographics));
                };
                self.context.profile = profile.clone();
                info!(
                    age = ?profile.age,
                    age_range = ?profile.age_range,
                    gender = ?profile.gender_birth,
                    race = ?profile.race,
                    "profile collected"
                );
                DataRow::Demographics(profile.clone())
            }
            Step::Comprehension => match self.gate.respond(&response.value, rt) {
                Some(GateEvent::Evaluated(record)) => DataRow::Comprehension(record),
                Some(GateEvent::Acknowledged { screen }) => DataRow::Screen(ScreenRecord {
                    screen: screen.to_string(),
                    set_id: None,
                    normalized_category: None,
                    rt,
                }),
                None => DataRow::Comprehension(ComprehensionRecord {
                    attempt: self.gate.attempts(),
                    passed: true,
                    answers: IndexMap::new(),
                    rt,
                }),
            },
            Step::Preview { set, stimulus, .. } => DataRow::Preview(PreviewRecord {
                set_id: set.set_id.clone(),
                normalized_category: set.normalized_category.clone(),
                stimulus_src: stimulus.src.clone(),
                stimulus_label: stimulus.label.clone(),
                utc_start,
                utc_end,
            }),
            Step::Rating { set, stimulus } => {
                let value = slider_value(StepKind::Rating, &response.value)?;
                DataRow::Rating(RatingRecord {
                    category: set.category,
                    set_id: set.set_id.clone(),
                    normalized_category: set.normalized_category.clone(),
                    set_label: set.set_label.clone(),
                    stimulus_src: stimulus.src.clone(),
                    stimulus_label: stimulus.label.clone(),
                    utc_start,
                    utc_end,
                    rt,
                    response: value,
                    rating: value,
                })
            }
            Step::Preference { set, .. } => {
                let value = slider_value(StepKind::Preference, &response.value)?;
                let trial = live
                    .trial
                    .as_ref()
                    .ok_or_else(|| mismatch(StepKind::Preference))?;
                let (left_src, left_label) = trial.left();
                let (right_src, right_label) = trial.right();
                DataRow::Preference(PreferenceRecord {
                    category: set.category,
                    set_id: set.set_id.clone(),
                    normalized_category: set.normalized_category.clone(),
                    set_label: set.set_label.clone(),
                    familiar_src: trial.familiar.src.clone(),
                    familiar_label: trial.familiar.label.clone(),
                    novel_src: trial.novel.src.clone(),
                    novel_label: trial.novel.label.clone(),
                    familiar_on_left: trial.familiar_on_left,
                    familiar_side: trial.familiar_side(),
                    novel_side: trial.novel_side(),
                    left_src: left_src.to_string(),
                    left_label: left_label.to_string(),
                    right_src: right_src.to_string(),
                    right_label: right_label.to_string(),
                    preference: value.round() as i32,
                    utc_start,
                    utc_end,
                    rt,
                })
            }
            Step::FamiliarDebug { set } => DataRow::DebugFamiliarFailed(screen_record(
                StepKind::FamiliarDebug,
                Some(set),
                rt,
            )),
            Step::PreferenceUnavailable { set, message } => {
                DataRow::PreferenceUnavailable(SetFailure {
                    set_id: set.set_id.clone(),
                    category: set.category,
                    normalized_category: set.normalized_category.clone(),
                    message: message.clone(),
                })
            }
            Step::FatalCount {
                set,
                required,
                available,
            } => DataRow::FatalCategoryCount(CountViolation {
                set_id: set.set_id.clone(),
                category: set.category,
                required: *required,
                available: *available,
            }),
            Step::Questionnaire { block } => {
                let ResponseValue::Survey(answers) = &response.value else {
                    return Err(mismatch(StepKind::Questionnaire));
                };
                DataRow::Questionnaire(QuestionnaireRecord {
                    questionnaire_name: block.name.clone(),
                    responses: answers.clone(),
                    rt,
                })
            }
            Step::SetupError { message } => DataRow::SetupError(SetupFailure {
                message: message.clone(),
            }),
            step @ (Step::Welcome
            | Step::SetIntro { .. }
            | Step::PreviewInstructions { .. }
            | Step::RatingInstructions { .. }
            | Step::PreferenceInstructions { .. }
            | Step::Fixation { .. }
            | Step::Outro) => DataRow::Screen(screen_record(step.kind(), step.set(), rt)),
            Step::BuildPlan | Step::ComputeFamiliar { .. } => {
                return Err(EngineError::NoLiveStep);
            }
        };
        Ok(vec![row])
    }

    fn finish(&mut self) {
        if self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
            info!(
                rows = self.context.store.len(),
                comprehension_attempts = self.gate.attempts(),
                "run complete"
            );
        }
    }

    /// Primary store.
    pub fn store(&self) -> &S {
        &self.context.store
    }

    /// Rating mirror used when the store cannot be queried.
    pub fn cache(&self) -> &ResponseCache {
        &self.context.cache
    }

    /// Profile collected by the demographics step.
    pub fn profile(&self) -> &ParticipantProfile {
        &self.context.profile
    }

    /// Run-scoping parameters.
    pub fn params(&self) -> &RunParams {
        &self.params
    }

    /// Comprehension gate state.
    pub fn gate(&self) -> &ComprehensionGate {
        &self.gate
    }

    /// Familiar outcome recorded for `set_id` within `category`, if it has
    /// been computed.
    pub fn familiar_outcome(&self, category: Category, set_id: &str) -> Option<&FamiliarOutcome> {
        self.context.familiars.get(&SetKey::new(category, set_id))
    }

    /// Steps not yet presented, excluding the live one.
    pub fn remaining_steps(&self) -> usize {
        self.pending.len()
    }

    /// `true` once `present` has returned `None`.
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// When the session was created.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the last step was finalized.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Payload for the external submission collaborator.
    pub fn payload(&self) -> Result<SubmissionPayload, EngineError> {
        SubmissionPayload::from_rows(
            &self.params,
            self.started_at,
            self.finished_at,
            self.context.store.rows(),
        )
    }

    /// Return URL for the recruitment platform, when a completion code was given.
    pub fn completion_url(&self) -> Option<String> {
        self.params.completion_code.as_deref().map(completion_url)
    }

    /// Consume the session and return its store.
    pub fn into_store(self) -> S {
        self.context.store
    }
}

fn text<I, T>(title: &str, lines: I) -> ScreenContent
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    ScreenContent::Text {
        title: title.to_string(),
        lines: lines.into_iter().map(Into::into).collect(),
    }
}

fn image_ref(src: &str, label: &str) -> ImageRef {
    ImageRef {
        src: src.to_string(),
        label: label.to_string(),
    }
}

fn screen_record(kind: StepKind, set: Option<&SetTag>, rt: Option<u64>) -> ScreenRecord {
    ScreenRecord {
        screen: kind.as_str().to_string(),
        set_id: set.map(|set| set.set_id.clone()),
        normalized_category: set.map(|set| set.normalized_category.clone()),
        rt,
    }
}

fn slider_value(step: StepKind, value: &ResponseValue) -> Result<f64, EngineError> {
    match value {
        ResponseValue::Slider { value, .. } => Ok(*value),
        _ => Err(mismatch(step)),
    }
}

fn mismatch(step: StepKind) -> EngineError {
    EngineError::InvalidResponse {
        step,
        details: "response does not match the step".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Block;
    use crate::gate::correct_answers;
    use crate::types::SetId;

    fn manifest(sets: &[(Category, &str, usize)]) -> Vec<StimulusRecord> {
        sets.iter()
            .flat_map(|(category, set, count)| {
                (0..*count).map(move |idx| StimulusRecord {
                    src: format!("{set}/{idx:03}.jpg"),
                    label: format!("{set}_{idx:03}"),
                    category: *category,
                    set: Some(set.to_string()),
                })
            })
            .collect()
    }

    fn answer(session: &Session, step: &Presentation) -> Response {
        match &step.constraint {
            ResponseConstraint::Timed { .. } => Response::timeout(),
            ResponseConstraint::Key { .. } => Response::key(" "),
            ResponseConstraint::Slider { slider } => Response::slider(slider.max),
            ResponseConstraint::Profile => Response::profile(ParticipantProfile {
                age: Some(30),
                age_range: None,
                gender_birth: Some("male".into()),
                race: Some("asian".into()),
            }),
            ResponseConstraint::Choice { .. } => {
                Response::choices(correct_answers(&session.config.comprehension))
            }
            ResponseConstraint::Survey => Response::survey(serde_json::json!({"ok": true})),
        }
    }

    fn run(session: &mut Session) {
        while let Some(step) = session.present().expect("present") {
            let response = answer(session, &step);
            session.finalize(response).expect("finalize");
        }
    }

    #[test]
    fn present_is_idempotent_until_finalized() {
        let mut session = Session::in_memory(
            EngineConfig::default(),
            RunParams::default(),
            manifest(&[(Category::Geometry, "circles", 40)]),
            Vec::new(),
        )
        .expect("session");
        let first = session.present().expect("present").expect("step");
        let again = session.present().expect("present").expect("step");
        assert_eq!(first, again);
        assert_eq!(first.kind, StepKind::Demographics);
    }

    #[test]
    fn invalid_response_keeps_step_live() {
        let mut session = Session::in_memory(
            EngineConfig::default(),
            RunParams::default(),
            manifest(&[(Category::Geometry, "circles", 40)]),
            Vec::new(),
        )
        .expect("session");
        session.present().expect("present");
        let err = session.finalize(Response::key(" ")).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidResponse {
                step: StepKind::Demographics,
                ..
            }
        ));
        assert_eq!(
            session.present().expect("present").map(|step| step.kind),
            Some(StepKind::Demographics)
        );
    }

    #[test]
    fn finalize_without_live_step_fails() {
        let mut session = Session::in_memory(
            EngineConfig::default(),
            RunParams::default(),
            manifest(&[(Category::Geometry, "circles", 40)]),
            Vec::new(),
        )
        .expect("session");
        assert!(matches!(
            session.finalize(Response::key(" ")),
            Err(EngineError::NoLiveStep)
        ));
    }

    #[test]
    fn empty_manifest_yields_setup_error_only() {
        let mut session = Session::in_memory(
            EngineConfig::default(),
            RunParams::default(),
            Vec::new(),
            Vec::new(),
        )
        .expect("session");
        let step = session.present().expect("present").expect("step");
        assert_eq!(step.kind, StepKind::SetupError);
        session.finalize(Response::key("x")).expect("finalize");
        assert!(session.present().expect("present").is_none());
        assert_eq!(session.store().rows().len(), 1);
        assert_eq!(session.store().rows()[0].trial_type(), "setup_error");
    }

    #[test]
    fn full_set_records_ratings_then_preferences() {
        let mut session = Session::in_memory(
            EngineConfig::default(),
            RunParams::default(),
            manifest(&[(Category::Geometry, "circles", 40)]),
            Vec::new(),
        )
        .expect("session");
        run(&mut session);
        let rows = session.store().rows();
        assert_eq!(rows.iter().filter(|row| row.as_rating().is_some()).count(), 19);
        assert_eq!(rows.iter().filter(|row| row.as_preference().is_some()).count(), 18);
        assert!(rows.iter().any(|row| row.trial_type() == "compute_familiar"));
        assert!(!rows.iter().any(|row| row.trial_type() == "debug_familiar_failed"));
        assert_eq!(
            session
                .cache()
                .len_for(&SetKey::new(Category::Geometry, "circles")),
            19
        );
        assert_eq!(
            session
                .familiar_outcome(Category::Geometry, "Circles")
                .map(|outcome| outcome.source),
            Some(FamiliarSource::Ratings)
        );
        assert!(session.is_finished());
    }

    fn stimulus(set: &str, idx: usize) -> StimulusRecord {
        StimulusRecord {
            src: format!("{set}/{idx:03}.jpg"),
            label: format!("{set}_{idx:03}"),
            category: Category::Geometry,
            set: Some(set.to_string()),
        }
    }

    /// Preference stage of `set` as the sequencer lays it out after the
    /// familiar computation.
    fn preference_stage(set: &SetTag, fallback: Option<StimulusRecord>, novel: usize) -> Vec<Step> {
        let mut steps = vec![
            Step::ComputeFamiliar {
                set: set.clone(),
                fallback,
            },
            Step::FamiliarDebug { set: set.clone() },
            Step::PreferenceInstructions { set: set.clone() },
        ];
        for idx in 0..novel {
            steps.push(Step::Fixation {
                set: set.clone(),
                duration_ms: 700,
            });
            steps.push(Step::Preference {
                set: set.clone(),
                novel: stimulus(&set.set_id, 100 + idx),
            });
        }
        steps
    }

    fn run_collecting(session: &mut Session) -> Vec<(StepKind, Option<SetId>)> {
        let mut seen = Vec::new();
        while let Some(step) = session.present().expect("present") {
            seen.push((step.kind, step.set.as_ref().map(|set| set.set_id.clone())));
            let response = answer(session, &step);
            session.finalize(response).expect("finalize");
        }
        seen
    }

    #[test]
    fn missing_familiar_shows_notice_skips_preferences_and_next_set_runs() {
        let mut session = Session::in_memory(
            EngineConfig::default(),
            RunParams::default(),
            manifest(&[(Category::Geometry, "circles", 40)]),
            Vec::new(),
        )
        .expect("session");
        let broken = SetTag::new(Category::Geometry, "unrated");
        let circles = Block::new(
            Category::Geometry,
            "circles",
            (0..40).map(|idx| stimulus("circles", idx)).collect(),
        )
        .expect("block");
        let mut timeline = preference_stage(&broken, None, 3);
        timeline.extend(
            session
                .sequencer
                .expand(&circles, &mut session.context.rng),
        );
        timeline.push(Step::Outro);
        session.pending = timeline.into();

        let seen = run_collecting(&mut session);
        let unrated: Vec<StepKind> = seen
            .iter()
            .filter(|(_, set)| set.as_deref() == Some("unrated"))
            .map(|(kind, _)| *kind)
            .collect();
        assert_eq!(
            unrated,
            vec![StepKind::FamiliarDebug, StepKind::PreferenceUnavailable]
        );

        let rows = session.store().rows();
        let head: Vec<&str> = rows.iter().take(3).map(DataRow::trial_type).collect();
        assert_eq!(
            head,
            vec![
                "compute_familiar_failed",
                "debug_familiar_failed",
                "preference_unavailable"
            ]
        );
        assert!(
            rows.iter()
                .filter_map(DataRow::as_preference)
                .all(|row| row.set_id == "circles")
        );
        assert_eq!(rows.iter().filter_map(DataRow::as_rating).count(), 19);
        assert_eq!(rows.iter().filter_map(DataRow::as_preference).count(), 18);
        assert_eq!(
            session
                .familiar_outcome(Category::Geometry, "unrated")
                .map(|outcome| outcome.source),
            Some(FamiliarSource::Unavailable)
        );
        assert_eq!(
            session
                .familiar_outcome(Category::Geometry, "circles")
                .map(|outcome| outcome.source),
            Some(FamiliarSource::Ratings)
        );
        assert_eq!(seen.last().map(|(kind, _)| *kind), Some(StepKind::Outro));
    }

    #[test]
    fn positional_fallback_is_recorded_and_preferences_use_it() {
        let mut session = Session::in_memory(
            EngineConfig::default(),
            RunParams::default(),
            manifest(&[(Category::Geometry, "circles", 40)]),
            Vec::new(),
        )
        .expect("session");
        let set = SetTag::new(Category::Geometry, "previewed");
        let fallback = stimulus("previewed", 9);
        let mut timeline = preference_stage(&set, Some(fallback.clone()), 2);
        timeline.push(Step::Outro);
        session.pending = timeline.into();

        let kinds: Vec<StepKind> = run_collecting(&mut session)
            .into_iter()
            .map(|(kind, _)| kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                StepKind::PreferenceInstructions,
                StepKind::Fixation,
                StepKind::Preference,
                StepKind::Fixation,
                StepKind::Preference,
                StepKind::Outro,
            ]
        );

        let rows = session.store().rows();
        let DataRow::ComputeFamiliarFallback(record) = &rows[0] else {
            panic!("expected a fallback row, got {}", rows[0].trial_type());
        };
        assert_eq!(record.familiar_src.as_deref(), Some(fallback.src.as_str()));
        assert!(record.message.is_some());
        let preferences: Vec<_> = rows.iter().filter_map(DataRow::as_preference).collect();
        assert_eq!(preferences.len(), 2);
        assert!(preferences.iter().all(|row| row.familiar_src == fallback.src));
        assert!(!rows.iter().any(|row| row.trial_type() == "debug_familiar_failed"));
        assert_eq!(
            session
                .familiar_outcome(Category::Geometry, "previewed")
                .map(|outcome| outcome.source),
            Some(FamiliarSource::PositionalFallback)
        );
    }

    #[test]
    fn familiar_lookups_do_not_cross_categories() {
        let mut records = manifest(&[(Category::Geometry, "__root", 40)]);
        records.extend(manifest(&[(Category::NaturalScene, "__root", 40)]));
        for record in &mut records {
            record.src = format!("{}/{}", record.category, record.src);
            record.set = None;
        }
        let mut session = Session::in_memory(
            EngineConfig::default(),
            RunParams::default(),
            records,
            Vec::new(),
        )
        .expect("session");
        run(&mut session);

        let rows = session.store().rows();
        for category in [Category::Geometry, Category::NaturalScene] {
            let key = SetKey::new(category, "__root");
            assert_eq!(session.cache().len_for(&key), 19, "cache for {key}");
            let familiar = rows
                .iter()
                .find_map(|row| match row {
                    DataRow::ComputeFamiliar(record) if record.category == category => {
                        Some(record)
                    }
                    _ => None,
                })
                .expect("familiar row");
            assert_eq!(familiar.rating_count, 19);
            let prefix = format!("{category}/");
            for row in rows.iter().filter_map(DataRow::as_preference) {
                if row.category == category {
                    assert!(row.familiar_src.starts_with(&prefix), "{}", row.familiar_src);
                }
            }
        }
        assert_eq!(rows.iter().filter_map(DataRow::as_preference).count(), 36);
    }

    #[test]
    fn test_mode_runs_only_questionnaires() {
        let mut session = Session::in_memory(
            EngineConfig::default(),
            RunParams::from_query("test_questionnaire=1"),
            manifest(&[(Category::Geometry, "circles", 40)]),
            vec![QuestionnaireBlock::new("tipi", serde_json::Value::Null)],
        )
        .expect("session");
        run(&mut session);
        let rows = session.store().rows();
        assert!(rows.iter().all(|row| row.as_rating().is_none()));
        assert_eq!(
            rows.iter()
                .filter(|row| row.trial_type() == "questionnaire")
                .count(),
            1
        );
    }
}
