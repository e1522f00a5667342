//! Task schema
//!
//! Tasks are published as JSON by the experiment driver. Each stage has its own
//! record; the dataset selection fields shared by all of them are flattened
//! into `DatasetSelection`. Payloads are validated right after
//! deserialization so a malformed task never reaches the dataset service or
//! the external executable.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::errors::WorkerError;
use crate::types::{ClassAttributeType, ClassParseError, ClassValue, ParameterValue, Parameters};

/// Errors raised while reading a task or output payload
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("true class value: {0}")]
    ClassValue(#[from] ClassParseError),
}

impl From<TaskError> for WorkerError {
    fn from(e: TaskError) -> Self {
        WorkerError::InvalidTask(e.to_string())
    }
}

/// Post-deserialization checks for queue payloads
pub trait Validate {
    fn validate(&self) -> Result<(), TaskError>;
}

/// Deserialize and validate a queue payload
pub fn parse_payload<T>(payload: &[u8]) -> Result<T, TaskError>
where
    T: DeserializeOwned + Validate,
{
    let value: T = serde_json::from_slice(payload)?;
    value.validate()?;
    Ok(value)
}

/// Dataset slice selection shared by every stage's task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSelection {
    pub dataset_name: String,
    pub training_rate: f64,
    pub fusion_rate: f64,
    #[serde(default)]
    pub sample_rate: Option<f64>,
    pub class_attribute: String,
    pub class_attribute_type: ClassAttributeType,
    #[serde(deserialize_with = "scalar_as_string")]
    pub true_class_value: String,
    #[serde(default)]
    pub include_attributes: Vec<String>,
    #[serde(default)]
    pub exclude_attributes: Vec<String>,
    pub attributes_rate: f64,
    pub random_seed: u64,
    #[serde(default)]
    pub include_header: bool,
}

impl DatasetSelection {
    /// The positive class, typed by the declared class attribute type
    pub fn positive_class(&self) -> Result<ClassValue, ClassParseError> {
        self.class_attribute_type.parse(&self.true_class_value)
    }

    fn validate(&self) -> Result<(), TaskError> {
        non_empty("dataset_name", &self.dataset_name)?;
        non_empty("class_attribute", &self.class_attribute)?;
        rate("training_rate", self.training_rate)?;
        rate("fusion_rate", self.fusion_rate)?;
        rate("attributes_rate", self.attributes_rate)?;
        if let Some(sample_rate) = self.sample_rate {
            rate("sample_rate", sample_rate)?;
        }
        if self.training_rate + self.fusion_rate > 1.0 {
            return Err(TaskError::InvalidField {
                field: "fusion_rate",
                reason: "training_rate + fusion_rate exceeds 1".to_string(),
            });
        }
        self.positive_class()?;
        Ok(())
    }
}

/// Task consumed by the learn stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnTask {
    pub job_name: String,
    pub task_number: u64,
    #[serde(flatten)]
    pub selection: DatasetSelection,
    /// Learning budget in seconds
    pub duration: u64,
    #[serde(default)]
    pub learn_parameters: Parameters,
}

impl Validate for LearnTask {
    fn validate(&self) -> Result<(), TaskError> {
        non_empty("job_name", &self.job_name)?;
        if self.selection.sample_rate.is_none() {
            return Err(TaskError::InvalidField {
                field: "sample_rate",
                reason: "required by the learn stage".to_string(),
            });
        }
        self.selection.validate()
    }
}

/// Task consumed by the filter stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterTask {
    pub job_name: String,
    pub learner_outputs_number: usize,
    #[serde(flatten)]
    pub selection: DatasetSelection,
    /// False-negative cost weight; false positives weigh `1 - threshold`
    pub threshold: f64,
    #[serde(default)]
    pub predict_parameters: Option<Parameters>,
}

impl Validate for FilterTask {
    fn validate(&self) -> Result<(), TaskError> {
        non_empty("job_name", &self.job_name)?;
        if self.learner_outputs_number == 0 {
            return Err(TaskError::InvalidField {
                field: "learner_outputs_number",
                reason: "must be at least 1".to_string(),
            });
        }
        rate("threshold", self.threshold)?;
        self.selection.validate()
    }
}

/// Task consumed by the fuser stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuserTask {
    pub job_name: String,
    #[serde(flatten)]
    pub selection: DatasetSelection,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub predict_parameters: Option<Parameters>,
}

impl Validate for FuserTask {
    fn validate(&self) -> Result<(), TaskError> {
        non_empty("job_name", &self.job_name)?;
        if let Some(threshold) = self.threshold {
            rate("threshold", threshold)?;
        }
        self.selection.validate()
    }
}

fn non_empty(field: &'static str, value: &str) -> Result<(), TaskError> {
    if value.trim().is_empty() {
        return Err(TaskError::InvalidField {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

fn rate(field: &'static str, value: f64) -> Result<(), TaskError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(TaskError::InvalidField {
            field,
            reason: format!("{} is outside [0, 1]", value),
        });
    }
    Ok(())
}

/// Accept the true class as a JSON string or as a bare number
fn scalar_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    ParameterValue::deserialize(deserializer).map(|v| v.to_string())
}
