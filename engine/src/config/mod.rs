//! Configuration management
//!
//! This module handles loading and validation of the worker configuration.
//! Configuration is stored in TOML format at ~/.ccube/config.toml. The worker
//! never writes this file; when it is absent the built-in defaults apply.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **broker**: AMQP broker location
//! - **dataset_service**: Dataset slicing service location
//! - **persistence**: Stage journal settings
//!
//! # Environment Overrides
//!
//! `AMQP_HOSTNAME`, `AMQP_PORT`, `FACTORIZER_HOSTNAME` and `FACTORIZER_PORT`
//! take precedence over the file, which keeps container deployments working
//! without a config file at all.
//!
//! The per-stage protocol settings (`CCUBE_LEARN_*`, `CCUBE_PREDICT_*`) live
//! in [`settings`].
//!
//! # Examples
//!
//! ```no_run
//! use ccube_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load(None)?;
//! println!("Broker: {}", config.broker.url());
//! # Ok(())
//! # }
//! ```

pub mod settings;

pub use settings::{LearnSettings, PredictSettings};

use ccube_sdk::errors::WorkerError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::process::Environment;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core worker settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Message broker
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Dataset slicing service
    #[serde(default)]
    pub dataset_service: DatasetServiceConfig,

    /// Stage journal
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Core worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_hostname")]
    pub hostname: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    #[serde(default = "default_virtual_host")]
    pub virtual_host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetServiceConfig {
    #[serde(default = "default_dataset_hostname")]
    pub hostname: String,

    #[serde(default = "default_dataset_port")]
    pub port: u16,
}

/// Stage journal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Record stage times and fusion metrics
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// SQLite database path, defaults to `<data_dir>/ccube.db`
    #[serde(default)]
    pub database: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.ccube")
}

fn default_broker_hostname() -> String {
    "rabbitmq".to_string()
}

fn default_broker_port() -> u16 {
    5672
}

fn default_virtual_host() -> String {
    "/".to_string()
}

fn default_dataset_hostname() -> String {
    "factorizer".to_string()
}

fn default_dataset_port() -> u16 {
    5000
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            hostname: default_broker_hostname(),
            port: default_broker_port(),
            virtual_host: default_virtual_host(),
        }
    }
}

impl Default for DatasetServiceConfig {
    fn default() -> Self {
        Self {
            hostname: default_dataset_hostname(),
            port: default_dataset_port(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database: None,
        }
    }
}

impl BrokerConfig {
    /// AMQP URI of the broker, with the virtual host percent-encoded
    pub fn url(&self) -> String {
        let virtual_host = self.virtual_host.replace('%', "%25").replace('/', "%2f");
        format!("amqp://{}:{}/{}", self.hostname, self.port, virtual_host)
    }
}

impl DatasetServiceConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.hostname, self.port)
    }
}

impl Config {
    /// Loads the configuration used by a worker process.
    ///
    /// With `path` the file must exist. Without it the default location is
    /// read when present. Environment overrides from the current process are
    /// applied last, then the result is validated.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - An explicitly requested file cannot be read
    /// - TOML parsing fails
    /// - An override variable holds an invalid value
    /// - Validation fails
    pub fn load(path: Option<&Path>) -> Result<Self, WorkerError> {
        let mut config = match path {
            Some(path) => Self::read(path)?,
            None => {
                let default_path = Self::default_config_path()?;
                if default_path.exists() {
                    Self::read(&default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(&Environment::from_current())?;
        config.validate_and_process()?;
        Ok(config)
    }

    /// Load configuration from a specific path, without environment overrides
    pub fn load_from_path(path: &Path) -> Result<Self, WorkerError> {
        let mut config = Self::read(path)?;
        config.validate_and_process()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, WorkerError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| WorkerError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&contents)
            .map_err(|e| WorkerError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Get the default configuration file path (~/.ccube/config.toml)
    pub fn default_config_path() -> Result<PathBuf, WorkerError> {
        let home = dirs::home_dir()
            .ok_or_else(|| WorkerError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".ccube").join("config.toml"))
    }

    /// Applies the deployment overrides found in `env`
    pub fn apply_env(&mut self, env: &Environment) -> Result<(), WorkerError> {
        if let Some(hostname) = env.get("AMQP_HOSTNAME") {
            self.broker.hostname = hostname.to_string();
        }
        if let Some(port) = env.get("AMQP_PORT") {
            self.broker.port = parse_port("AMQP_PORT", port)?;
        }
        if let Some(hostname) = env.get("FACTORIZER_HOSTNAME") {
            self.dataset_service.hostname = hostname.to_string();
        }
        if let Some(port) = env.get("FACTORIZER_PORT") {
            self.dataset_service.port = parse_port("FACTORIZER_PORT", port)?;
        }
        Ok(())
    }

    /// Path of the journal database after defaults are applied
    pub fn database_path(&self) -> PathBuf {
        self.persistence
            .database
            .clone()
            .unwrap_or_else(|| self.core.data_dir.join("ccube.db"))
    }

    fn validate_and_process(&mut self) -> Result<(), WorkerError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(WorkerError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.broker.hostname.trim().is_empty() {
            return Err(WorkerError::Config(
                "broker.hostname must not be empty".to_string(),
            ));
        }
        if self.dataset_service.hostname.trim().is_empty() {
            return Err(WorkerError::Config(
                "dataset_service.hostname must not be empty".to_string(),
            ));
        }
        if self.broker.port == 0 || self.dataset_service.port == 0 {
            return Err(WorkerError::Config("ports must be non-zero".to_string()));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if let Some(database) = &self.persistence.database {
            self.persistence.database = Some(expand_path(database)?);
        }

        Ok(())
    }
}

fn parse_port(variable: &str, value: &str) -> Result<u16, WorkerError> {
    value.trim().parse().map_err(|_| {
        WorkerError::Config(format!("{} is not a valid port: '{}'", variable, value))
    })
}

/// Expand ~ in path to user's home directory
pub fn expand_path(path: &Path) -> Result<PathBuf, WorkerError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| WorkerError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| WorkerError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| WorkerError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
