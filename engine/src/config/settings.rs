//! Stage protocol settings
//!
//! The command a stage runs, where it runs and where its outputs land are
//! deployment concerns set next to the executable, so they are read from the
//! environment rather than from config.toml.

use ccube_sdk::errors::WorkerError;
use std::path::PathBuf;

use crate::process::Environment;

pub const LEARN_COMMAND: &str = "CCUBE_LEARN_COMMAND";
pub const LEARN_WORKING_DIRECTORY: &str = "CCUBE_LEARN_WORKING_DIRECTORY";
pub const LEARN_OUTPUT_FILES: &str = "CCUBE_LEARN_OUTPUT_FILES";
pub const LEARN_DATASET_FILE: &str = "CCUBE_LEARN_DATASET_FILE";
pub const LEARN_PARAMETERS_PROPERTIES_FILE: &str = "CCUBE_LEARN_PARAMETERS_PROPERTIES_FILE";
pub const LEARN_DURATION_SECONDS: &str = "CCUBE_LEARN_DURATION_SECONDS";
pub const LEARN_DURATION_MINUTES: &str = "CCUBE_LEARN_DURATION_MINUTES";

pub const PREDICT_COMMAND: &str = "CCUBE_PREDICT_COMMAND";
pub const PREDICT_WORKING_DIRECTORY: &str = "CCUBE_PREDICT_WORKING_DIRECTORY";
pub const PREDICT_INPUT_FILES: &str = "CCUBE_PREDICT_INPUT_FILES";
pub const PREDICT_DATASET_FILE: &str = "CCUBE_PREDICT_DATASET_FILE";
pub const PREDICT_PARAMETERS_PROPERTIES_FILE: &str = "CCUBE_PREDICT_PARAMETERS_PROPERTIES_FILE";
pub const PREDICT_PREDICTIONS_FILE: &str = "CCUBE_PREDICT_PREDICTIONS_FILE";

/// How the learn stage drives the learner executable
#[derive(Debug, Clone, PartialEq)]
pub struct LearnSettings {
    pub command: String,
    pub working_directory: PathBuf,
    /// Files and directories packed into the learner output
    pub output_files: Vec<PathBuf>,
}

impl LearnSettings {
    pub fn from_environment(env: &Environment) -> Result<Self, WorkerError> {
        let command = required(env, LEARN_COMMAND)?;
        let working_directory = PathBuf::from(required(env, LEARN_WORKING_DIRECTORY)?);
        let output_files = env
            .get(LEARN_OUTPUT_FILES)
            .map(|raw| {
                std::env::split_paths(&env.expand(raw))
                    .filter(|path| !path.as_os_str().is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            command,
            working_directory,
            output_files,
        })
    }
}

/// How the filter and fuser stages drive the predictor executable
#[derive(Debug, Clone, PartialEq)]
pub struct PredictSettings {
    pub command: String,
    pub working_directory: PathBuf,
    /// File the predictor writes, one label per dataset row
    pub predictions_file: PathBuf,
}

impl PredictSettings {
    pub fn from_environment(env: &Environment) -> Result<Self, WorkerError> {
        let command = required(env, PREDICT_COMMAND)?;
        let working_directory = PathBuf::from(required(env, PREDICT_WORKING_DIRECTORY)?);
        let predictions_file = PathBuf::from(env.expand(&required(env, PREDICT_PREDICTIONS_FILE)?));

        Ok(Self {
            command,
            working_directory,
            predictions_file,
        })
    }
}

fn required(env: &Environment, name: &str) -> Result<String, WorkerError> {
    match env.get(name) {
        Some(value) if !value.trim().is_empty() => Ok(value.to_string()),
        _ => Err(WorkerError::MissingVariable(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learn_settings_expand_output_files() {
        let env = Environment::new()
            .with(LEARN_COMMAND, "java -jar gpfunction.jar")
            .with(LEARN_WORKING_DIRECTORY, "/opt/gpfunction")
            .with(
                LEARN_OUTPUT_FILES,
                "${CCUBE_LEARN_WORKING_DIRECTORY}/mostAccurate.txt:$HOME/models",
            )
            .with("HOME", "/home/worker");

        let settings = LearnSettings::from_environment(&env).unwrap();

        assert_eq!(settings.command, "java -jar gpfunction.jar");
        assert_eq!(
            settings.output_files,
            vec![
                PathBuf::from("/opt/gpfunction/mostAccurate.txt"),
                PathBuf::from("/home/worker/models"),
            ]
        );
    }

    #[test]
    fn test_learn_settings_without_output_files() {
        let env = Environment::new()
            .with(LEARN_COMMAND, "true")
            .with(LEARN_WORKING_DIRECTORY, "/tmp");

        let settings = LearnSettings::from_environment(&env).unwrap();
        assert!(settings.output_files.is_empty());
    }

    #[test]
    fn test_missing_command_is_reported() {
        let env = Environment::new().with(LEARN_WORKING_DIRECTORY, "/tmp");
        match LearnSettings::from_environment(&env) {
            Err(WorkerError::MissingVariable(name)) => assert_eq!(name, LEARN_COMMAND),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_predict_settings() {
        let env = Environment::new()
            .with(PREDICT_COMMAND, "./predict.sh")
            .with(PREDICT_WORKING_DIRECTORY, "/opt/model")
            .with(PREDICT_PREDICTIONS_FILE, "$CCUBE_PREDICT_WORKING_DIRECTORY/out.txt");

        let settings = PredictSettings::from_environment(&env).unwrap();
        assert_eq!(settings.predictions_file, PathBuf::from("/opt/model/out.txt"));
    }

    #[test]
    fn test_predict_settings_require_predictions_file() {
        let env = Environment::new()
            .with(PREDICT_COMMAND, "./predict.sh")
            .with(PREDICT_WORKING_DIRECTORY, "/opt/model");

        assert!(matches!(
            PredictSettings::from_environment(&env),
            Err(WorkerError::MissingVariable(_))
        ));
    }
}
