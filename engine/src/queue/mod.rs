//! Task queues
//!
//! Stages talk to each other only through named durable queues. A consumed
//! message stays unacknowledged, and is redelivered after a disconnect, until
//! the stage acknowledges it explicitly. Stages acknowledge only after their
//! result is published, which gives at-least-once processing.
//!
//! Two implementations share the [`TaskQueue`] contract:
//!
//! - [`amqp::AmqpQueue`] talks AMQP 0-9-1 to a broker
//! - [`memory::MemoryBroker`] keeps queues in process, for tests and
//!   single-host dry runs

pub mod amqp;
pub mod memory;

pub use amqp::AmqpQueue;
pub use memory::{MemoryBroker, MemoryQueue};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use ccube_sdk::errors::WorkerError;
use ccube_sdk::task::{parse_payload, Validate};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Broker connection failed: {0}")]
    Connection(String),

    #[error("Queue '{queue}': {reason}")]
    Operation { queue: String, reason: String },

    #[error("Queue '{0}' does not exist")]
    UnknownQueue(String),

    #[error("Unknown delivery {tag} on queue '{queue}'")]
    UnknownDelivery { queue: String, tag: u64 },

    #[error("Connection is closed")]
    Closed,

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<QueueError> for WorkerError {
    fn from(e: QueueError) -> Self {
        WorkerError::Queue(e.to_string())
    }
}

/// Handle used to acknowledge one delivered message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AckToken(u64);

impl AckToken {
    pub fn new(tag: u64) -> Self {
        Self(tag)
    }

    pub fn tag(&self) -> u64 {
        self.0
    }
}

/// Queue lifecycle, publication and acknowledged consumption
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Declares a queue; declaring an existing queue is a no-op
    async fn create_queue(&self, name: &str) -> Result<(), QueueError>;

    /// Deletes a queue and its messages; deleting a missing queue is a no-op
    async fn delete_queue(&self, name: &str) -> Result<(), QueueError>;

    /// Appends every payload to the queue, in order, one message each
    async fn publish_messages(&self, queue: &str, messages: Vec<Vec<u8>>)
        -> Result<(), QueueError>;

    /// Waits until `count` messages are delivered.
    ///
    /// The messages stay unacknowledged until
    /// [`acknowledge_messages`](TaskQueue::acknowledge_messages) is called
    /// with their tokens.
    async fn consume_messages(
        &self,
        queue: &str,
        count: usize,
    ) -> Result<(Vec<Vec<u8>>, Vec<AckToken>), QueueError>;

    async fn acknowledge_messages(&self, queue: &str, tokens: &[AckToken])
        -> Result<(), QueueError>;

    /// Closes the connection; unacknowledged messages return to their queues
    async fn close(&self) -> Result<(), QueueError>;
}

/// Serialises each record as one JSON message
pub async fn publish_json<Q, T>(queue: &Q, name: &str, records: &[T]) -> Result<(), WorkerError>
where
    Q: TaskQueue + ?Sized,
    T: Serialize + Sync,
{
    let messages = records
        .iter()
        .map(serde_json::to_vec)
        .collect::<Result<Vec<_>, _>>()
        .map_err(QueueError::from)?;

    queue.publish_messages(name, messages).await?;
    debug!("Published {} message(s) to {}", records.len(), name);
    Ok(())
}

/// Consumes `count` messages and parses them as `T`.
///
/// A payload that fails to parse or validate is a task error; the delivered
/// messages are left unacknowledged.
pub async fn consume_json<Q, T>(
    queue: &Q,
    name: &str,
    count: usize,
) -> Result<(Vec<T>, Vec<AckToken>), WorkerError>
where
    Q: TaskQueue + ?Sized,
    T: DeserializeOwned + Validate,
{
    let (messages, tokens) = queue.consume_messages(name, count).await?;
    debug!("Consumed {} message(s) from {}", messages.len(), name);

    let records = messages
        .iter()
        .map(|payload| parse_payload(payload))
        .collect::<Result<Vec<T>, _>>()?;
    Ok((records, tokens))
}

/// Queue names of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub learner_tasks: String,
    pub learner_outputs: String,
    pub filter_tasks: String,
    pub filter_outputs: String,
    pub fuser_tasks: String,
    pub fuser_outputs: String,
}

impl QueueNames {
    pub fn for_job(job: &str) -> Self {
        let name = |stage: &str, kind: &str| format!("{}@{}.{}", job, stage, kind);
        Self {
            learner_tasks: name("learner", "tasks"),
            learner_outputs: name("learner", "outputs"),
            filter_tasks: name("filter", "tasks"),
            filter_outputs: name("filter", "outputs"),
            fuser_tasks: name("fuser", "tasks"),
            fuser_outputs: name("fuser", "outputs"),
        }
    }
}
