//! External process execution
//!
//! `ProcessRunner` launches the external learner/predictor command through
//! `/bin/sh` in a given working directory with a fully controlled environment.
//! Standard error is merged into standard output; the merged stream is
//! forwarded line by line to the log as it is produced and also returned to
//! the caller together with the exit code.
//!
//! Parameters reach the executable only through the environment. Callers
//! build an `Environment` from structured values and hand it over at launch
//! time.

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use ccube_sdk::errors::WorkerError;

const SHELL: &str = "/bin/sh";

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Working directory does not exist: {0:?}")]
    MissingWorkingDirectory(PathBuf),

    #[error("Failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read process output: {0}")]
    Output(std::io::Error),

    #[error("Failed to wait for process: {0}")]
    Wait(std::io::Error),
}

impl From<ProcessError> for WorkerError {
    fn from(e: ProcessError) -> Self {
        WorkerError::Process(e.to_string())
    }
}

/// Environment variables handed to a child process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment(BTreeMap<String, String>);

impl Environment {
    /// Creates an empty environment
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Snapshot of the current process environment.
    ///
    /// Variables whose name or value is not valid UTF-8 are left out.
    pub fn from_current() -> Self {
        Self::from_os_vars(std::env::vars_os())
    }

    fn from_os_vars<I>(variables: I) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        Self(
            variables
                .into_iter()
                .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
                    (Ok(key), Ok(value)) => Some((key, value)),
                    (key, _) => {
                        debug!("Skipping non UTF-8 environment variable {:?}", key);
                        None
                    }
                })
                .collect(),
        )
    }

    /// Adds a variable, builder style
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Adds all variables, replacing existing values
    pub fn extend<I, K, V>(&mut self, variables: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in variables {
            self.0.insert(key.into(), value.into());
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Expands `$NAME` and `${NAME}` references against this environment.
    ///
    /// References to unset variables are left untouched.
    pub fn expand(&self, text: &str) -> String {
        static REFERENCE: OnceLock<Regex> = OnceLock::new();
        let pattern = REFERENCE.get_or_init(|| {
            Regex::new(r"\$(?:\{([^}]+)\}|([A-Za-z_][A-Za-z0-9_]*))")
                .unwrap_or_else(|e| unreachable!("variable reference pattern is valid: {}", e))
        });

        pattern
            .replace_all(text, |caps: &Captures| {
                let name = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                match self.get(name) {
                    Some(value) => value.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut environment = Self::new();
        environment.extend(iter);
        environment
    }
}

/// Merged output and exit status of a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub output: String,
    /// Exit code, `-1` when the process was terminated by a signal
    pub exit_code: i32,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs one shell command with a controlled environment
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    command: String,
    working_directory: PathBuf,
    environment: Environment,
}

impl ProcessRunner {
    pub fn new(
        command: impl Into<String>,
        working_directory: impl Into<PathBuf>,
        environment: Environment,
    ) -> Self {
        Self {
            command: command.into(),
            working_directory: working_directory.into(),
            environment,
        }
    }

    /// Adds the variables to the environment already set
    pub fn add_environment_variables<I, K, V>(&mut self, variables: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.environment.extend(variables);
    }

    /// Renders the command with its variable references expanded, without
    /// running it.
    ///
    /// Expansion never goes through the shell, so nothing in the command can
    /// execute while it is rendered.
    pub fn echo(&self) -> String {
        let rendered = self.environment.expand(&self.command);
        info!("Command: {}", rendered);
        rendered
    }

    /// Executes the command, streaming merged stdout/stderr to the log
    pub async fn run(&self) -> Result<ProcessOutput, ProcessError> {
        info!(
            "Running command in {}: {}",
            self.working_directory.display(),
            self.command
        );
        let output = self.spawn_and_collect().await?;
        info!("Command exited with code {}", output.exit_code);
        Ok(output)
    }

    async fn spawn_and_collect(&self) -> Result<ProcessOutput, ProcessError> {
        if !self.working_directory.is_dir() {
            return Err(ProcessError::MissingWorkingDirectory(
                self.working_directory.clone(),
            ));
        }

        // `exec 2>&1` merges stderr into the stdout pipe for everything that follows
        let mut child = Command::new(SHELL)
            .arg("-c")
            .arg(format!("exec 2>&1\n{}", self.command))
            .current_dir(&self.working_directory)
            .env_clear()
            .envs(self.environment.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let mut output = String::new();
        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout);
            let mut buffer = Vec::new();
            loop {
                buffer.clear();
                let read = reader
                    .read_until(b'\n', &mut buffer)
                    .await
                    .map_err(ProcessError::Output)?;
                if read == 0 {
                    break;
                }
                let line = String::from_utf8_lossy(&buffer);
                info!(target: "ccube_engine::process", "{}", line.trim_end());
                output.push_str(&line);
            }
        }

        let status = child.wait().await.map_err(ProcessError::Wait)?;
        let exit_code = status.code().unwrap_or(-1);
        debug!("Process finished with status {}", status);

        Ok(ProcessOutput { output, exit_code })
    }
}
