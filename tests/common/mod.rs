#![allow(dead_code)]

use trialseq::data::{Category, ParticipantProfile, StimulusRecord};
use trialseq::gate::correct_answers;
use trialseq::step::{Presentation, Response, ResponseConstraint};
use trialseq::{EngineConfig, EngineError, ResponseStore, Session};

pub fn set_records(category: Category, set: &str, count: usize) -> Vec<StimulusRecord> {
    (0..count)
        .map(|idx| StimulusRecord {
            src: format!("stimuli/{}/{set}/{idx:03}.jpg", category.as_str()),
            label: format!("{set}_{idx:03}"),
            category,
            set: Some(set.to_string()),
        })
        .collect()
}

pub fn profile(gender: &str, race: &str, age: u32) -> ParticipantProfile {
    ParticipantProfile {
        age: Some(age),
        age_range: None,
        gender_birth: Some(gender.to_string()),
        race: Some(race.to_string()),
    }
}

/// Answers every step validly; the comprehension check is failed
/// `wrong_attempts` times before the correct answers are given.
pub struct Participant {
    pub profile: ParticipantProfile,
    pub wrong_attempts: u32,
    pub rating: f64,
    pub preference: f64,
}

impl Participant {
    pub fn new(profile: ParticipantProfile) -> Self {
        Self {
            profile,
            wrong_attempts: 0,
            rating: 5.5,
            preference: -2.0,
        }
    }

    pub fn respond(&mut self, step: &Presentation) -> Response {
        match &step.constraint {
            ResponseConstraint::Timed { .. } => Response::timeout(),
            ResponseConstraint::Key { .. } => Response::key(" "),
            ResponseConstraint::Slider { slider } if slider.min < 0.0 => {
                Response::slider(self.preference).with_rt(640)
            }
            ResponseConstraint::Slider { .. } => Response::slider(self.rating).with_rt(820),
            ResponseConstraint::Profile => Response::profile(self.profile.clone()),
            ResponseConstraint::Choice { .. } if self.wrong_attempts > 0 => {
                self.wrong_attempts -= 1;
                Response::choices([
                    ("q1", "wrong text"),
                    ("q2", "Use the whole scale, including extreme values..."),
                ])
            }
            ResponseConstraint::Choice { .. } => {
                Response::choices(correct_answers(&EngineConfig::default().comprehension))
            }
            ResponseConstraint::Survey => Response::survey(serde_json::json!({"done": true})),
        }
    }
}

/// Drive `session` to completion, returning every presentation in order.
pub fn run_to_end<R, S>(
    session: &mut Session<R, S>,
    participant: &mut Participant,
) -> Result<Vec<Presentation>, EngineError>
where
    R: rand::Rng,
    S: ResponseStore,
{
    let mut seen = Vec::new();
    while let Some(step) = session.present()? {
        let response = participant.respond(&step);
        session.finalize(response)?;
        seen.push(step);
    }
    Ok(seen)
}
