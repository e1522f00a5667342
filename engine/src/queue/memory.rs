//! In-process broker
//!
//! Mirrors the broker behaviour stages rely on: a consumer blocks until
//! enough messages are ready, delivered messages belong to the connection
//! that received them, and a connection that goes away without acknowledging
//! puts its messages back at the head of their queue.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use super::{AckToken, QueueError, TaskQueue};

#[derive(Default)]
struct BrokerState {
    queues: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    /// Woken whenever messages become ready
    ready: Notify,
    next_tag: AtomicU64,
}

impl BrokerState {
    fn queues(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Vec<u8>>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared in-memory broker; clones refer to the same queues
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new connection to the broker
    pub fn connect(&self) -> MemoryQueue {
        MemoryQueue {
            state: Arc::clone(&self.state),
            unacked: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Messages waiting for delivery, 0 for a missing queue
    pub fn ready_count(&self, queue: &str) -> usize {
        self.state.queues().get(queue).map_or(0, VecDeque::len)
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.state.queues().contains_key(queue)
    }
}

struct Unacked {
    queue: String,
    tag: u64,
    payload: Vec<u8>,
}

/// One connection to a [`MemoryBroker`]
pub struct MemoryQueue {
    state: Arc<BrokerState>,
    unacked: Mutex<Vec<Unacked>>,
    closed: AtomicBool,
}

impl MemoryQueue {
    /// Messages delivered on this connection and not yet acknowledged
    pub fn unacked_count(&self) -> usize {
        self.unacked().len()
    }

    fn unacked(&self) -> MutexGuard<'_, Vec<Unacked>> {
        self.unacked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }

    /// Puts every unacknowledged message back at the head of its queue,
    /// keeping the original delivery order.
    fn requeue_unacked(&self) {
        let pending: Vec<Unacked> = self.unacked().drain(..).collect();
        if pending.is_empty() {
            return;
        }

        {
            let mut queues = self.state.queues();
            for message in pending.into_iter().rev() {
                if let Some(queue) = queues.get_mut(&message.queue) {
                    queue.push_front(message.payload);
                }
            }
        }
        self.state.ready.notify_waiters();
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn create_queue(&self, name: &str) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.state.queues().entry(name.to_string()).or_default();
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.state.queues().remove(name);
        Ok(())
    }

    async fn publish_messages(
        &self,
        queue: &str,
        messages: Vec<Vec<u8>>,
    ) -> Result<(), QueueError> {
        self.ensure_open()?;
        {
            let mut queues = self.state.queues();
            let target = queues
                .get_mut(queue)
                .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
            target.extend(messages);
        }
        self.state.ready.notify_waiters();
        Ok(())
    }

    async fn consume_messages(
        &self,
        queue: &str,
        count: usize,
    ) -> Result<(Vec<Vec<u8>>, Vec<AckToken>), QueueError> {
        loop {
            self.ensure_open()?;

            // Registered before checking so a publish in between is not missed
            let ready = self.state.ready.notified();

            {
                let mut queues = self.state.queues();
                let source = queues
                    .get_mut(queue)
                    .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;

                if source.len() >= count {
                    let mut messages = Vec::with_capacity(count);
                    let mut tokens = Vec::with_capacity(count);
                    let mut unacked = self.unacked();

                    for payload in source.drain(..count) {
                        let tag = self.state.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
                        unacked.push(Unacked {
                            queue: queue.to_string(),
                            tag,
                            payload: payload.clone(),
                        });
                        messages.push(payload);
                        tokens.push(AckToken::new(tag));
                    }
                    return Ok((messages, tokens));
                }
            }

            ready.await;
        }
    }

    async fn acknowledge_messages(
        &self,
        queue: &str,
        tokens: &[AckToken],
    ) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut unacked = self.unacked();
        for token in tokens {
            let position = unacked
                .iter()
                .position(|m| m.tag == token.tag() && m.queue == queue)
                .ok_or_else(|| QueueError::UnknownDelivery {
                    queue: queue.to_string(),
                    tag: token.tag(),
                })?;
            unacked.remove(position);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.requeue_unacked();
        }
        Ok(())
    }
}

impl Drop for MemoryQueue {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.requeue_unacked();
        }
    }
}
