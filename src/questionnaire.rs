//! Opaque questionnaire suite appended after the set stages.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::EngineError;
use crate::types::QuestionnaireName;

/// One presentable questionnaire block. The payload is rendered by the
/// caller and never inspected here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestionnaireBlock {
    /// Name written to the `questionnaire_name` field of the response row.
    pub name: QuestionnaireName,
    /// Renderer-specific content (items, scale labels, ...).
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl QuestionnaireBlock {
    pub fn new(name: impl Into<QuestionnaireName>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Parse a JSON array of questionnaire blocks.
pub fn load_questionnaires_str(json: &str) -> Result<Vec<QuestionnaireBlock>, EngineError> {
    let blocks: Vec<QuestionnaireBlock> = serde_json::from_str(json)?;
    info!(blocks = blocks.len(), "loaded questionnaire suite");
    Ok(blocks)
}

/// Read and parse a questionnaire suite file.
pub fn load_questionnaires_path(
    path: impl AsRef<Path>,
) -> Result<Vec<QuestionnaireBlock>, EngineError> {
    let text = fs::read_to_string(path.as_ref())?;
    load_questionnaires_str(&text)
}
