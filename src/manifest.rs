//! Stimulus manifest loading.
//!
//! The manifest is a JSON array of `{src, label, category, set}` objects.
//! Records with an unknown category are skipped with a warning; an empty
//! manifest loads fine and is reported by the session as a setup error.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::data::{Category, StimulusRecord};
use crate::errors::EngineError;
use crate::utils::label_from_src;

/// Manifest entry before category validation.
#[derive(Debug, Deserialize)]
struct RawStimulus {
    src: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    set: Option<String>,
}

/// Parse a manifest from JSON text.
pub fn load_manifest_str(json: &str) -> Result<Vec<StimulusRecord>, EngineError> {
    let raw: Vec<RawStimulus> =
        serde_json::from_str(json).map_err(|err| EngineError::Manifest(err.to_string()))?;
    let total = raw.len();
    let records: Vec<StimulusRecord> = raw.into_iter().filter_map(into_record).collect();
    info!(
        total,
        kept = records.len(),
        "loaded stimulus manifest"
    );
    Ok(records)
}

/// Read and parse a manifest file.
pub fn load_manifest_path(path: impl AsRef<Path>) -> Result<Vec<StimulusRecord>, EngineError> {
    let text = fs::read_to_string(path.as_ref())?;
    load_manifest_str(&text)
}

fn into_record(raw: RawStimulus) -> Option<StimulusRecord> {
    let category_raw = raw.category.as_deref().unwrap_or_default();
    let Some(category) = Category::parse(category_raw) else {
        warn!(
            src = %raw.src,
            category = %category_raw,
            "skipping stimulus with unknown category"
        );
        return None;
    };
    let label = raw
        .label
        .filter(|label| !label.trim().is_empty())
        .unwrap_or_else(|| label_from_src(&raw.src));
    let set = raw.set.filter(|set| !set.trim().is_empty());
    Some(StimulusRecord {
        src: raw.src,
        label,
        category,
        set,
    })
}
