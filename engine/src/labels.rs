//! Label file parsing
//!
//! Ground-truth responses from the dataset service and predictions files
//! written by the external executable share one format: one label per line,
//! aligned with the dataset rows.

use ccube_sdk::errors::WorkerError;
use ccube_sdk::types::{ClassAttributeType, ClassParseError, ClassValue};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("line {line}: {source}")]
pub struct LabelError {
    pub line: usize,
    #[source]
    pub source: ClassParseError,
}

impl From<LabelError> for WorkerError {
    fn from(e: LabelError) -> Self {
        WorkerError::Codec(format!("invalid label, {}", e))
    }
}

/// Parses one label per line as `class_type`.
///
/// Blank lines are skipped. With `skip_header` the first non-blank line is
/// treated as a column header and dropped.
pub fn parse_labels(
    text: &str,
    class_type: ClassAttributeType,
    skip_header: bool,
) -> Result<Vec<ClassValue>, LabelError> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    if skip_header {
        lines.next();
    }

    lines
        .map(|(index, line)| {
            class_type.parse(line).map_err(|source| LabelError {
                line: index + 1,
                source,
            })
        })
        .collect()
}
