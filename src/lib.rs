#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Response cache mirroring rating rows.
pub mod cache;
/// Engine configuration and run-scoping parameters.
pub mod config;
/// Centralized constants used across planning, sequencing, and the gate.
pub mod constants;
/// Stimulus, profile, block, and recorded row types.
pub mod data;
/// Reusable demo runners.
pub mod example_apps;
/// Familiar-image selection.
pub mod familiar;
/// Comprehension gate loop.
pub mod gate;
mod hash;
/// Category/set grouping of the stimulus manifest.
pub mod index;
/// Stimulus manifest loading.
pub mod manifest;
/// Submission payload assembly.
pub mod payload;
/// Per-participant plan construction.
pub mod plan;
/// Opaque questionnaire suite.
pub mod questionnaire;
/// Deterministic random source.
pub mod rng;
/// Per-set stage expansion.
pub mod sequencer;
/// Run orchestration.
pub mod session;
/// Step descriptors, presentations, and responses.
pub mod step;
/// Primary response store.
pub mod store;
/// Shared type aliases.
pub mod types;
/// Normalization and query-string helpers.
pub mod utils;

mod errors;

pub use cache::ResponseCache;
pub use config::{EngineConfig, PlanConfig, ProfileFallback, RunParams, SequencerConfig};
pub use data::{
    Block, Category, DataRow, FamiliarSelection, ParticipantProfile, PreferenceRecord,
    RatingRecord, SetKey, StimulusRecord,
};
pub use errors::EngineError;
pub use familiar::FamiliarSelector;
pub use gate::ComprehensionGate;
pub use index::StimulusIndex;
pub use payload::SubmissionPayload;
pub use plan::{Plan, PlanBuilder};
pub use questionnaire::QuestionnaireBlock;
pub use rng::DeterministicRng;
pub use sequencer::SetSequencer;
pub use session::Session;
pub use step::{Presentation, Response, ResponseConstraint, Step, StepKind};
pub use store::{InMemoryResponseStore, ResponseStore};
pub use types::{NormalizedKey, ParticipantId, SetId};
