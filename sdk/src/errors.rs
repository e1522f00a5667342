//! Error types and handling
//!
//! This module provides the error type surfaced by every worker stage.
//! All errors implement the `WorkerErrorExt` trait which names the phase that
//! failed, gives an operator-facing hint, and says whether redelivery of the
//! task can be expected to succeed.
//!
//! # Phases
//!
//! - **Queue**: broker unreachable, publish/consume/ack failures
//! - **Fetch**: dataset service errors, truncated downloads
//! - **Process**: external executable could not run or produced no predictions
//! - **Policy**: filter/fuser preconditions violated
//! - **Codec**: artifact packing/unpacking and label parsing
//! - **Task**: malformed task or output payloads
//! - **Config**: invalid configuration or missing protocol variables
//! - **Persistence**: stage journal failures

use std::fmt;
use thiserror::Error;

/// Phase of a stage invocation in which an error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Queue,
    Fetch,
    Process,
    Policy,
    Codec,
    Task,
    Config,
    Persistence,
    Io,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Queue => "queue",
            Phase::Fetch => "fetch",
            Phase::Process => "process",
            Phase::Policy => "policy",
            Phase::Codec => "codec",
            Phase::Task => "task",
            Phase::Config => "config",
            Phase::Persistence => "persistence",
            Phase::Io => "io",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for worker error extensions
pub trait WorkerErrorExt {
    /// Phase of the stage that failed
    fn phase(&self) -> Phase;

    /// Returns a short operator-facing hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether re-running the stage on the redelivered task may succeed
    ///
    /// Transport and fetch errors are transient by nature. Malformed tasks and
    /// policy violations fail the same way on every delivery.
    fn is_recoverable(&self) -> bool;
}

/// Main worker error type
///
/// # Examples
///
/// ```
/// use ccube_sdk::errors::{Phase, WorkerError, WorkerErrorExt};
///
/// let error = WorkerError::Queue("connection refused".to_string());
/// assert_eq!(error.phase(), Phase::Queue);
/// assert!(error.is_recoverable());
///
/// let fatal = WorkerError::Policy("expected exactly two class values, found 3".to_string());
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Dataset fetch error: {0}")]
    Fetch(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Policy error: {0}")]
    Policy(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerErrorExt for WorkerError {
    fn phase(&self) -> Phase {
        match self {
            Self::Queue(_) => Phase::Queue,
            Self::Fetch(_) => Phase::Fetch,
            Self::Process(_) => Phase::Process,
            Self::Policy(_) => Phase::Policy,
            Self::Codec(_) => Phase::Codec,
            Self::InvalidTask(_) => Phase::Task,
            Self::Config(_) | Self::MissingVariable(_) => Phase::Config,
            Self::Persistence(_) => Phase::Persistence,
            Self::Io(_) => Phase::Io,
        }
    }

    fn user_hint(&self) -> &str {
        match self {
            Self::Queue(_) => "Check that the message broker is reachable",
            Self::Fetch(_) => "Check that the dataset service is reachable and the dataset exists",
            Self::Process(_) => "Check the executable's output above and its predictions file",
            Self::Policy(_) => "Check the class labels and the models reaching this stage",
            Self::Codec(_) => "Artifact or label data is corrupt",
            Self::InvalidTask(_) => "Fix the task payload published to the tasks queue",
            Self::Config(_) => "Check your config.toml file for errors",
            Self::MissingVariable(_) => "Export the missing CCUBE_* variable before starting",
            Self::Persistence(_) => "Check the journal database path and permissions",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Queue(_) | Self::Fetch(_) | Self::Persistence(_) | Self::Io(_) => true,

            Self::Process(_)
            | Self::Policy(_)
            | Self::Codec(_)
            | Self::InvalidTask(_)
            | Self::Config(_)
            | Self::MissingVariable(_) => false,
        }
    }
}
