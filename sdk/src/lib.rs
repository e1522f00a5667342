//! CCube SDK
//!
//! Wire-level types shared by the worker stages and by anything that
//! publishes tasks or reads stage outputs.

/// Error types and handling
pub mod errors;

/// Stage output records
pub mod messages;

/// Task schema
pub mod task;

/// Typed labels, parameters and metrics
pub mod types;

// Re-export commonly used types
pub use errors::{Phase, WorkerError, WorkerErrorExt};
pub use messages::{FilterOutput, FuserOutput, LearnerOutput, ModelArtifact};
pub use task::{
    parse_payload, DatasetSelection, FilterTask, FuserTask, LearnTask, TaskError, Validate,
};
pub use types::{ClassAttributeType, ClassValue, Metrics, ParameterValue, Parameters};
