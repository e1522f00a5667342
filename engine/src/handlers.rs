//! Command handlers for CLI operations
//!
//! Each handler reads the stage's protocol settings from the environment,
//! connects the stage to the broker, the dataset service and the journal
//! described by the configuration, runs the stage once and releases every
//! connection.

use tracing::{info, warn};

use ccube_sdk::errors::WorkerError;

use crate::config::settings::{LearnSettings, PredictSettings};
use crate::config::Config;
use crate::dataset::DatasetClient;
use crate::db::Database;
use crate::platform::HostInfo;
use crate::process::Environment;
use crate::queue::AmqpQueue;
use crate::stages::{persistence, FilterStage, FuserStage, LearnStage, StageContext};

/// Run the learn stage once
pub async fn handle_learn(job: &str, config: &Config) -> Result<(), WorkerError> {
    let environment = Environment::from_current();
    let stage = LearnStage::new(LearnSettings::from_environment(&environment)?);

    let context = connect(config, environment).await?;
    let result = stage.run(&context, job).await;
    finish(context, result).await?;
    Ok(())
}

/// Run the filter stage once
pub async fn handle_filter(job: &str, config: &Config) -> Result<(), WorkerError> {
    let environment = Environment::from_current();
    let stage = FilterStage::new(PredictSettings::from_environment(&environment)?);

    let context = connect(config, environment).await?;
    let result = stage.run(&context, job).await;
    finish(context, result).await?;
    Ok(())
}

/// Run the fuser stage once and print the ensemble metrics
pub async fn handle_fuser(job: &str, config: &Config) -> Result<(), WorkerError> {
    let environment = Environment::from_current();
    let stage = FuserStage::new(PredictSettings::from_environment(&environment)?);

    let context = connect(config, environment).await?;
    let result = stage.run(&context, job).await;
    let output = finish(context, result).await?;

    let rendered = serde_json::to_string_pretty(&output)
        .map_err(|e| WorkerError::Codec(format!("Failed to render metrics: {}", e)))?;
    println!("{}", rendered);
    Ok(())
}

async fn connect(
    config: &Config,
    environment: Environment,
) -> Result<StageContext<AmqpQueue>, WorkerError> {
    let queue = AmqpQueue::connect(&config.broker.url()).await?;
    let dataset = DatasetClient::new(config.dataset_service.base_url());
    let host = HostInfo::detect().await;
    info!("Running on {} ({})", host.hostname, host.ip);

    let context = StageContext::new(queue, dataset, host, environment);
    if !config.persistence.enabled {
        return Ok(context);
    }

    let journal = Database::new(&config.database_path())
        .await
        .map_err(persistence)?;
    Ok(context.with_journal(journal))
}

/// Closes the journal; a stage error wins over a close error
async fn finish<T>(
    context: StageContext<AmqpQueue>,
    result: Result<T, WorkerError>,
) -> Result<T, WorkerError> {
    let closed = context.shutdown().await;
    let value = result?;
    if let Err(e) = closed {
        warn!("Failed to close journal: {}", e);
    }
    Ok(value)
}
