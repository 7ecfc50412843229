//! Submission payload handed to the external submission collaborator.
//!
//! Transport and retry live outside the engine; this only assembles the
//! body and the platform return URL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RunParams;
use crate::constants::payload::COMPLETION_URL_BASE;
use crate::data::DataRow;
use crate::errors::EngineError;
use crate::utils::encode_uri_component;

/// Body posted once a run finishes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmissionPayload {
    pub prolific_pid: Option<String>,
    pub study_id: Option<String>,
    pub session_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Every store row, serialized as a JSON array string.
    pub data_json: String,
}

impl SubmissionPayload {
    /// Assemble a payload from run parameters and the stored rows.
    pub fn from_rows(
        params: &RunParams,
        started_at: DateTime<Utc>,
        finished_at: Option<DateTime<Utc>>,
        rows: &[DataRow],
    ) -> Result<Self, EngineError> {
        Ok(Self {
            prolific_pid: params.prolific_pid.clone(),
            study_id: params.study_id.clone(),
            session_id: params.session_id.clone(),
            started_at,
            finished_at,
            data_json: serde_json::to_string(rows)?,
        })
    }

    /// Serialize the payload body.
    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse `data_json` back into rows.
    pub fn rows(&self) -> Result<Vec<DataRow>, EngineError> {
        Ok(serde_json::from_str(&self.data_json)?)
    }
}

/// Return URL for a completion code.
pub fn completion_url(code: &str) -> String {
    format!("{COMPLETION_URL_BASE}{}", encode_uri_component(code))
}
