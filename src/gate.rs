//! Comprehension gate.
//!
//! Instruction pages are shown in order, followed by a two-item check.
//! Both answers must contain their expected substring. Any miss shows a
//! blocking notice and restarts from the first page; there is no retry cap.

use indexmap::IndexMap;
use tracing::{info, warn};

use crate::config::ComprehensionConfig;
use crate::data::ComprehensionRecord;
use crate::step::{ChoiceQuestion, KeyChoice, ResponseConstraint, ResponseValue, ScreenContent};
use crate::types::QuestionName;

/// Where the gate currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateState {
    /// Showing instruction page `page`.
    Presenting { page: usize },
    /// Waiting for check answers.
    Checking,
    /// Showing the failure notice before a restart.
    Notice,
    /// Check passed; the gate is done.
    Proceed,
}

/// What a gate response produced.
#[derive(Clone, Debug, PartialEq)]
pub enum GateEvent {
    /// An instruction page or the notice was acknowledged.
    Acknowledged { screen: &'static str },
    /// A check was evaluated.
    Evaluated(ComprehensionRecord),
}

/// Re-entrant instruction loop with a two-item check at the end.
#[derive(Clone, Debug)]
pub struct ComprehensionGate {
    config: ComprehensionConfig,
    state: GateState,
    attempts: u32,
}

impl ComprehensionGate {
    pub fn new(config: ComprehensionConfig) -> Self {
        let state = Self::first_state(&config);
        Self {
            config,
            state,
            attempts: 0,
        }
    }

    fn first_state(config: &ComprehensionConfig) -> GateState {
        if config.pages.is_empty() {
            GateState::Checking
        } else {
            GateState::Presenting { page: 0 }
        }
    }

    /// Current state.
    pub fn state(&self) -> GateState {
        self.state
    }

    /// Number of evaluated checks.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// `true` once both answers matched.
    pub fn is_complete(&self) -> bool {
        self.state == GateState::Proceed
    }

    /// Screen and constraint for the current state.
    pub fn screen(&self) -> (ScreenContent, ResponseConstraint) {
        let space = ResponseConstraint::Key {
            choice: KeyChoice::Space,
        };
        match self.state {
            GateState::Presenting { page } => match self.config.pages.get(page) {
                Some(page) => (
                    ScreenContent::Text {
                        title: page.title.clone(),
                        lines: page.lines.clone(),
                    },
                    space,
                ),
                None => self.check_screen(),
            },
            GateState::Checking => self.check_screen(),
            GateState::Notice => (
                ScreenContent::Text {
                    title: "Please review the instructions".into(),
                    lines: vec![self.config.failure_notice.clone()],
                },
                space,
            ),
            GateState::Proceed => (
                ScreenContent::Text {
                    title: "Thank you".into(),
                    lines: vec!["You answered both questions correctly.".into()],
                },
                ResponseConstraint::Key {
                    choice: KeyChoice::Any,
                },
            ),
        }
    }

    fn check_screen(&self) -> (ScreenContent, ResponseConstraint) {
        let questions = self
            .config
            .questions
            .iter()
            .map(|question| ChoiceQuestion {
                name: question.name.clone(),
                prompt: question.prompt.clone(),
                options: question.options.clone(),
            })
            .collect();
        let names = self
            .config
            .questions
            .iter()
            .map(|question| question.name.clone())
            .collect();
        (
            ScreenContent::Comprehension { questions },
            ResponseConstraint::Choice { names },
        )
    }

    /// Apply a validated response to the current state.
    ///
    /// Returns `None` when the gate has already passed.
    pub fn respond(&mut self, value: &ResponseValue, rt: Option<u64>) -> Option<GateEvent> {
        match self.state {
            GateState::Presenting { page } => {
                self.state = if page + 1 < self.config.pages.len() {
                    GateState::Presenting { page: page + 1 }
                } else {
                    GateState::Checking
                };
                Some(GateEvent::Acknowledged {
                    screen: "comprehension_instructions",
                })
            }
            GateState::Checking => {
                let answers = match value {
                    ResponseValue::Choice(answers) => answers.clone(),
                    _ => IndexMap::new(),
                };
                Some(GateEvent::Evaluated(self.evaluate(answers, rt)))
            }
            GateState::Notice => {
                self.state = Self::first_state(&self.config);
                Some(GateEvent::Acknowledged {
                    screen: "comprehension_notice",
                })
            }
            GateState::Proceed => None,
        }
    }

    fn evaluate(
        &mut self,
        answers: IndexMap<QuestionName, String>,
        rt: Option<u64>,
    ) -> ComprehensionRecord {
        self.attempts += 1;
        let passed = self.config.questions.iter().all(|question| {
            answers
                .get(&question.name)
                .is_some_and(|answer| answer_matches(answer, &question.expected))
        });
        if passed {
            self.state = GateState::Proceed;
            info!(attempt = self.attempts, "comprehension check passed");
        } else {
            self.state = GateState::Notice;
            warn!(attempt = self.attempts, "comprehension check failed; restarting instructions");
        }
        ComprehensionRecord {
            attempt: self.attempts,
            passed,
            answers,
            rt,
        }
    }
}

/// Case-insensitive substring match of `expected` within `answer`.
pub fn answer_matches(answer: &str, expected: &str) -> bool {
    answer.to_lowercase().contains(&expected.to_lowercase())
}

/// Answer pairs selecting the correct option of each configured item.
///
/// Used by simulated runs; picks the first option containing the expected text.
pub fn correct_answers(config: &ComprehensionConfig) -> Vec<(QuestionName, String)> {
    config
        .questions
        .iter()
        .map(|question| {
            let answer = question
                .options
                .iter()
                .find(|option| answer_matches(option, &question.expected))
                .cloned()
                .unwrap_or_else(|| question.expected.clone());
            (question.name.clone(), answer)
        })
        .collect()
}
