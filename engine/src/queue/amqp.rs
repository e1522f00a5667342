//! AMQP 0-9-1 task queue
//!
//! Queues are durable and addressed through the default exchange, messages
//! are published persistent. Consumption sets the prefetch window to the
//! number of messages wanted, collects exactly that many deliveries and
//! cancels the consumer, so the broker never hands this connection more
//! than it asked for.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
    BasicQosOptions, QueueDeclareOptions, QueueDeleteOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::{debug, info};

use super::{AckToken, QueueError, TaskQueue};

const PERSISTENT: u8 = 2;

/// A connection and channel to an AMQP broker
pub struct AmqpQueue {
    connection: Connection,
    channel: Channel,
}

impl AmqpQueue {
    /// Connects to `url`, e.g. `amqp://rabbitmq:5672/%2f`
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        info!("Connected to broker at {}", url);
        Ok(Self {
            connection,
            channel,
        })
    }
}

fn operation(queue: &str) -> impl Fn(lapin::Error) -> QueueError + '_ {
    move |e| QueueError::Operation {
        queue: queue.to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl TaskQueue for AmqpQueue {
    async fn create_queue(&self, name: &str) -> Result<(), QueueError> {
        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(operation(name))?;
        debug!("Declared queue {}", name);
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> Result<(), QueueError> {
        self.channel
            .queue_delete(name, QueueDeleteOptions::default())
            .await
            .map_err(operation(name))?;
        debug!("Deleted queue {}", name);
        Ok(())
    }

    async fn publish_messages(
        &self,
        queue: &str,
        messages: Vec<Vec<u8>>,
    ) -> Result<(), QueueError> {
        for payload in messages {
            self.channel
                .basic_publish(
                    "",
                    queue,
                    BasicPublishOptions::default(),
                    &payload,
                    BasicProperties::default().with_delivery_mode(PERSISTENT),
                )
                .await
                .map_err(operation(queue))?
                .await
                .map_err(operation(queue))?;
        }
        Ok(())
    }

    async fn consume_messages(
        &self,
        queue: &str,
        count: usize,
    ) -> Result<(Vec<Vec<u8>>, Vec<AckToken>), QueueError> {
        let mut messages = Vec::with_capacity(count);
        let mut tokens = Vec::with_capacity(count);
        if count == 0 {
            return Ok((messages, tokens));
        }

        let prefetch = u16::try_from(count).unwrap_or(u16::MAX);
        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(operation(queue))?;

        let mut consumer = self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(operation(queue))?;

        while messages.len() < count {
            match consumer.next().await {
                Some(Ok(delivery)) => {
                    tokens.push(AckToken::new(delivery.delivery_tag));
                    messages.push(delivery.data);
                }
                Some(Err(e)) => return Err(operation(queue)(e)),
                None => return Err(QueueError::Closed),
            }
        }

        self.channel
            .basic_cancel(consumer.tag().as_str(), BasicCancelOptions::default())
            .await
            .map_err(operation(queue))?;

        Ok((messages, tokens))
    }

    async fn acknowledge_messages(
        &self,
        queue: &str,
        tokens: &[AckToken],
    ) -> Result<(), QueueError> {
        for token in tokens {
            self.channel
                .basic_ack(token.tag(), BasicAckOptions::default())
                .await
                .map_err(operation(queue))?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.channel
            .close(200, "bye")
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        self.connection
            .close(200, "bye")
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        debug!("Closed broker connection");
        Ok(())
    }
}
