//! Stage output records
//!
//! These records travel between stages through the outputs queues. Their JSON
//! shape is shared with existing consumers and must not change:
//!
//! - learner output: `{"success": true, "files": "<base64 zip>"}`, with
//!   `files` null (or `false`) when the learner failed
//! - filter output: a JSON array of `{"files": "<base64 zip>"}`
//! - fuser output: the ensemble metrics plus the job name and random seed

use serde::{Deserialize, Deserializer, Serialize};

use crate::task::{TaskError, Validate};
use crate::types::Metrics;

/// Result of one learn stage invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerOutput {
    pub success: bool,
    #[serde(default, deserialize_with = "optional_blob")]
    pub files: Option<String>,
}

impl LearnerOutput {
    pub fn succeeded(files: String) -> Self {
        Self {
            success: true,
            files: Some(files),
        }
    }

    pub fn failed() -> Self {
        Self {
            success: false,
            files: None,
        }
    }
}

impl Validate for LearnerOutput {
    fn validate(&self) -> Result<(), TaskError> {
        if self.success && self.files.is_none() {
            return Err(TaskError::InvalidField {
                field: "files",
                reason: "a successful learner output must carry its artifact".to_string(),
            });
        }
        Ok(())
    }
}

/// One selected model, as forwarded by the filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub files: String,
}

/// Models that survived the filter, in their original order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterOutput(pub Vec<ModelArtifact>);

impl FilterOutput {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelArtifact> {
        self.0.iter()
    }
}

impl Validate for FilterOutput {
    fn validate(&self) -> Result<(), TaskError> {
        Ok(())
    }
}

/// Final evaluation published by the fuser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuserOutput {
    pub job_name: String,
    pub random_seed: u64,
    pub models: usize,
    #[serde(flatten)]
    pub metrics: Metrics,
}

impl Validate for FuserOutput {
    fn validate(&self) -> Result<(), TaskError> {
        Ok(())
    }
}

/// Producers mark a missing artifact either with `null` or with `false`
fn optional_blob<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Blob {
        Text(String),
        Flag(bool),
    }

    Ok(match Option::<Blob>::deserialize(deserializer)? {
        Some(Blob::Text(text)) => Some(text),
        Some(Blob::Flag(_)) | None => None,
    })
}
