//! CCube Engine Library
//!
//! This library provides the runtime components of the CCube pipeline
//! worker. It is used by both the main binary and integration tests.

/// Artifact packing for learner outputs
pub mod artifact;

/// CLI interface module
pub mod cli;

/// Configuration management module
pub mod config;

/// Dataset service client
pub mod dataset;

/// Stage journal persistence module
pub mod db;

/// Command handlers module
pub mod handlers;

/// Label file parsing
pub mod labels;

/// Running packaged models against a dataset
pub mod model_executor;

/// Host identity
pub mod platform;

/// Filter and fuser policies
pub mod policy;

/// External process execution
pub mod process;

/// Parameter properties files
pub mod properties;

/// Task queues
pub mod queue;

/// Learn, filter and fuser stages
pub mod stages;

/// Telemetry and Observability
pub mod telemetry;
