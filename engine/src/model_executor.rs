//! Model execution
//!
//! A `ModelExecutor` runs one packaged model against a dataset file through
//! the predictor executable and reads back the predicted labels. Each call
//! unpacks the model into its own temporary directory and writes its own
//! properties file; both are removed when the call returns, whatever the
//! outcome.
//!
//! Policies only see the [`Predictor`] trait, so they can be exercised with
//! fixed prediction vectors.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use ccube_sdk::errors::WorkerError;
use ccube_sdk::types::{ClassAttributeType, ClassValue, Parameters};

use crate::artifact::{ArtifactCodec, CodecError};
use crate::config::settings::{
    PredictSettings, PREDICT_DATASET_FILE, PREDICT_INPUT_FILES,
    PREDICT_PARAMETERS_PROPERTIES_FILE,
};
use crate::labels::{parse_labels, LabelError};
use crate::process::{Environment, ProcessError, ProcessRunner};
use crate::properties::write_properties;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Failed to unpack model: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Failed to prepare model workspace: {0}")]
    Workspace(io::Error),

    #[error("Predictor produced no predictions file at {0:?}")]
    MissingPredictions(PathBuf),

    #[error("Failed to read predictions: {0}")]
    ReadPredictions(io::Error),

    #[error("Invalid predictions file: {0}")]
    Labels(#[from] LabelError),
}

impl From<ExecutorError> for WorkerError {
    fn from(e: ExecutorError) -> Self {
        match e {
            ExecutorError::Codec(e) => e.into(),
            ExecutorError::Labels(e) => e.into(),
            other => WorkerError::Process(other.to_string()),
        }
    }
}

/// Anything that labels the rows of a dataset file
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, dataset: &Path) -> Result<Vec<ClassValue>, ExecutorError>;
}

/// Runs one packaged model through the predictor executable
#[derive(Debug, Clone)]
pub struct ModelExecutor {
    artifact: String,
    settings: PredictSettings,
    environment: Environment,
    parameters: Parameters,
    class_type: ClassAttributeType,
}

impl ModelExecutor {
    pub fn new(
        artifact: impl Into<String>,
        settings: PredictSettings,
        environment: Environment,
        parameters: Parameters,
        class_type: ClassAttributeType,
    ) -> Self {
        Self {
            artifact: artifact.into(),
            settings,
            environment,
            parameters,
            class_type,
        }
    }

    fn clear_stale_predictions(&self) -> Result<(), ExecutorError> {
        match std::fs::remove_file(&self.settings.predictions_file) {
            Ok(()) => {
                debug!(
                    "Removed stale predictions file {}",
                    self.settings.predictions_file.display()
                );
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ExecutorError::Workspace(e)),
        }
    }
}

#[async_trait]
impl Predictor for ModelExecutor {
    async fn predict(&self, dataset: &Path) -> Result<Vec<ClassValue>, ExecutorError> {
        let model_directory = tempfile::Builder::new()
            .prefix("ccube-model-")
            .tempdir()
            .map_err(ExecutorError::Workspace)?;
        ArtifactCodec::decode(&self.artifact, model_directory.path())?;

        let properties = write_properties(&self.parameters).map_err(ExecutorError::Workspace)?;

        let mut environment = self.environment.clone();
        environment.set(PREDICT_DATASET_FILE, dataset.to_string_lossy());
        environment.set(
            PREDICT_INPUT_FILES,
            model_directory.path().to_string_lossy(),
        );
        environment.extend(self.parameters.to_strings());
        environment.set(
            PREDICT_PARAMETERS_PROPERTIES_FILE,
            properties.path().to_string_lossy(),
        );

        self.clear_stale_predictions()?;

        let runner = ProcessRunner::new(
            self.settings.command.clone(),
            self.settings.working_directory.clone(),
            environment,
        );
        runner.echo();
        let output = runner.run().await?;
        if !output.success() {
            warn!(
                "Predictor exited with code {}, reading predictions anyway",
                output.exit_code
            );
        }

        let predictions_file = &self.settings.predictions_file;
        let text = match tokio::fs::read_to_string(predictions_file).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ExecutorError::MissingPredictions(predictions_file.clone()))
            }
            Err(e) => return Err(ExecutorError::ReadPredictions(e)),
        };

        let predictions = parse_labels(&text, self.class_type, false)?;
        debug!("Read {} predictions", predictions.len());
        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn packed_model(dir: &Path) -> String {
        let model = dir.join("model.txt");
        std::fs::write(&model, "1\n0\n1\n").unwrap();
        ArtifactCodec::encode(&[model]).unwrap()
    }

    fn executor(workdir: &TempDir, artifact: String, command: &str) -> ModelExecutor {
        let settings = PredictSettings {
            command: command.to_string(),
            working_directory: workdir.path().to_path_buf(),
            predictions_file: workdir.path().join("predictions.txt"),
        };
        ModelExecutor::new(
            artifact,
            settings,
            Environment::from_current(),
            Parameters::new(),
            ClassAttributeType::Integer,
        )
    }

    #[tokio::test]
    async fn test_predict_reads_model_output() {
        let source = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let executor = executor(
            &workdir,
            packed_model(source.path()),
            "cp \"$CCUBE_PREDICT_INPUT_FILES/model.txt\" predictions.txt",
        );

        let predictions = executor.predict(Path::new("/dev/null")).await.unwrap();

        assert_eq!(
            predictions,
            vec![
                ClassValue::Integer(1),
                ClassValue::Integer(0),
                ClassValue::Integer(1)
            ]
        );
    }

    #[tokio::test]
    async fn test_stale_predictions_not_reused() {
        let source = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        std::fs::write(workdir.path().join("predictions.txt"), "1\n").unwrap();

        let executor = executor(&workdir, packed_model(source.path()), "true");
        let result = executor.predict(Path::new("/dev/null")).await;

        assert!(matches!(result, Err(ExecutorError::MissingPredictions(_))));
    }

    #[tokio::test]
    async fn test_nonzero_exit_still_reads_predictions() {
        let source = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let executor = executor(
            &workdir,
            packed_model(source.path()),
            "echo 0 > predictions.txt; exit 2",
        );

        let predictions = executor.predict(Path::new("/dev/null")).await.unwrap();
        assert_eq!(predictions, vec![ClassValue::Integer(0)]);
    }

    #[tokio::test]
    async fn test_model_directory_removed_after_run() {
        let source = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let executor = executor(
            &workdir,
            packed_model(source.path()),
            "echo \"$CCUBE_PREDICT_INPUT_FILES\" > seen.txt; echo 1 > predictions.txt",
        );

        executor.predict(Path::new("/dev/null")).await.unwrap();

        let seen = std::fs::read_to_string(workdir.path().join("seen.txt")).unwrap();
        assert!(!Path::new(seen.trim()).exists());
    }
}
