//! Pipeline stages
//!
//! Each stage runs once per process invocation: it consumes its task (and the
//! upstream outputs it needs), fetches dataset slices, runs the external
//! executable through a policy, publishes exactly one result and only then
//! acknowledges what it consumed. A failure before the acknowledgment leaves
//! every consumed message to be redelivered.

use chrono::{DateTime, Utc};
use tracing::debug;

use ccube_sdk::errors::WorkerError;

use crate::dataset::DatasetClient;
use crate::db::{Database, StageEvent};
use crate::platform::HostInfo;
use crate::process::Environment;
use crate::queue::TaskQueue;

pub mod filter;
pub mod fuser;
pub mod learn;

pub use filter::FilterStage;
pub use fuser::FuserStage;
pub use learn::LearnStage;

/// Collaborators shared by every stage
pub struct StageContext<Q> {
    queue: Q,
    dataset: DatasetClient,
    journal: Option<Database>,
    host: HostInfo,
    environment: Environment,
}

impl<Q: TaskQueue> StageContext<Q> {
    pub fn new(queue: Q, dataset: DatasetClient, host: HostInfo, environment: Environment) -> Self {
        Self {
            queue,
            dataset,
            journal: None,
            host,
            environment,
        }
    }

    /// Records stage times and metrics in `journal`
    pub fn with_journal(mut self, journal: Database) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn dataset(&self) -> &DatasetClient {
        &self.dataset
    }

    pub fn journal(&self) -> Option<&Database> {
        self.journal.as_ref()
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    /// Base environment of every child process
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Appends a stage event to the journal; a no-op when it is disabled
    pub async fn record(
        &self,
        random_seed: u64,
        event: StageEvent,
        time: DateTime<Utc>,
    ) -> Result<(), WorkerError> {
        let Some(journal) = &self.journal else {
            debug!("Journal disabled, not recording {}", event.as_str());
            return Ok(());
        };

        journal
            .times()
            .record(&self.host, random_seed, event, time)
            .await
            .map_err(persistence)
    }

    /// Closes the journal, flushing its write-ahead log
    pub async fn shutdown(self) -> Result<(), WorkerError> {
        if let Some(journal) = self.journal {
            journal.close().await.map_err(persistence)?;
        }
        Ok(())
    }
}

pub(crate) fn persistence(e: anyhow::Error) -> WorkerError {
    WorkerError::Persistence(format!("{:#}", e))
}
