use std::io;

use thiserror::Error;

use crate::step::StepKind;

/// Error type for manifest, store, configuration, and response failures.
///
/// Scoped study failures (a short set, a missing familiar image) are not
/// errors: they surface as in-flow steps and recorded rows instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("stimulus manifest is empty")]
    EmptyManifest,
    #[error("stimulus manifest could not be read: {0}")]
    Manifest(String),
    #[error("response store is unavailable: {reason}")]
    StoreUnavailable { reason: String },
    #[error("invalid response for step '{step}': {details}")]
    InvalidResponse { step: StepKind, details: String },
    #[error("no step is awaiting a response")]
    NoLiveStep,
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
