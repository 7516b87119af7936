//! # In-Memory Transport
//!
//! Thread-safe in-process queue implementation for testing and development.
//!
//! ## Features
//!
//! - **Same Contract**: `listen`/`publish` behave like the RabbitMQ provider, including
//!   rejection of undecodable bodies
//! - **Simulated Dead-Lettering**: delayed messages sit on `"<queue>-delay"` until a tokio
//!   timer moves them back into `<queue>`, so paused-clock tests observe both stages
//! - **Inspection Helpers**: queue depth, stored bodies, rejected count and a settlement log

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, error};

use crate::constants::DEFAULT_RETRY_DELAY;
use crate::messaging::control::{ControlStatus, QueueControl, SettleOnce};
use crate::messaging::transport::{
    delay_queue_name, InboundMessage, MessageStream, MessageTransport,
};
use crate::messaging::MessagingResult;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: u64,
    body: Vec<u8>,
}

#[derive(Debug, Default)]
struct InMemoryQueue {
    /// Messages in the queue (FIFO order)
    messages: VecDeque<StoredMessage>,
    /// Wakes listeners blocked on an empty queue
    notify: Arc<Notify>,
    /// Total messages ever published to this queue
    total_published: u64,
}

/// A settlement observed by the in-memory provider
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub queue_name: String,
    pub data: Value,
    pub status: ControlStatus,
}

#[derive(Debug)]
struct InMemoryInner {
    queues: Mutex<HashMap<String, InMemoryQueue>>,
    settlements: Mutex<Vec<Settlement>>,
    next_id: AtomicU64,
    rejected: AtomicU64,
    retry_delay: Duration,
}

/// In-memory transport for tests and local development
///
/// Cheap to clone; clones share the same queues.
#[derive(Debug, Clone)]
pub struct InMemoryTransport {
    inner: Arc<InMemoryInner>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::with_retry_delay(DEFAULT_RETRY_DELAY)
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport whose control handles retry after `retry_delay`
    pub fn with_retry_delay(retry_delay: Duration) -> Self {
        Self {
            inner: Arc::new(InMemoryInner {
                queues: Mutex::new(HashMap::new()),
                settlements: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                rejected: AtomicU64::new(0),
                retry_delay,
            }),
        }
    }

    /// Enqueue an arbitrary body, bypassing JSON encoding
    pub fn publish_raw(&self, queue_name: &str, body: impl Into<Vec<u8>>) {
        self.push(queue_name, body.into());
    }

    /// Number of messages currently waiting on `queue_name`
    pub fn queue_depth(&self, queue_name: &str) -> usize {
        self.inner
            .queues
            .lock()
            .get(queue_name)
            .map_or(0, |queue| queue.messages.len())
    }

    /// Decoded bodies currently waiting on `queue_name`, oldest first
    pub fn messages(&self, queue_name: &str) -> Vec<Value> {
        self.inner
            .queues
            .lock()
            .get(queue_name)
            .map(|queue| {
                queue
                    .messages
                    .iter()
                    .filter_map(|message| serde_json::from_slice(&message.body).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total messages ever published to `queue_name`
    pub fn total_published(&self, queue_name: &str) -> u64 {
        self.inner
            .queues
            .lock()
            .get(queue_name)
            .map_or(0, |queue| queue.total_published)
    }

    /// Number of undecodable bodies rejected by listeners
    pub fn rejected_count(&self) -> u64 {
        self.inner.rejected.load(Ordering::Acquire)
    }

    /// Every settlement performed by control handles of this transport, in order
    pub fn settlements(&self) -> Vec<Settlement> {
        self.inner.settlements.lock().clone()
    }

    fn record_settlement(&self, queue_name: &str, data: &Value, status: ControlStatus) {
        self.inner.settlements.lock().push(Settlement {
            queue_name: queue_name.to_string(),
            data: data.clone(),
            status,
        });
    }

    fn queue_notify(&self, queue_name: &str) -> Arc<Notify> {
        let mut queues = self.inner.queues.lock();
        Arc::clone(&queues.entry(queue_name.to_string()).or_default().notify)
    }

    fn push(&self, queue_name: &str, body: Vec<u8>) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut queues = self.inner.queues.lock();
        let queue = queues.entry(queue_name.to_string()).or_default();
        queue.messages.push_back(StoredMessage { id, body });
        queue.total_published += 1;
        queue.notify.notify_one();
        id
    }

    fn pop(&self, queue_name: &str) -> Option<StoredMessage> {
        self.inner
            .queues
            .lock()
            .get_mut(queue_name)
            .and_then(|queue| queue.messages.pop_front())
    }

    /// Move message `id` from the delay queue into its target, as TTL expiry would
    fn dead_letter(&self, delay_queue: &str, target_queue: &str, id: u64) {
        let mut queues = self.inner.queues.lock();
        let expired = queues.get_mut(delay_queue).and_then(|queue| {
            let position = queue.messages.iter().position(|m| m.id == id)?;
            queue.messages.remove(position)
        });

        if let Some(message) = expired {
            let target = queues.entry(target_queue.to_string()).or_default();
            target.messages.push_back(message);
            target.total_published += 1;
            target.notify.notify_one();
            debug!(
                delay_queue = %delay_queue,
                queue = %target_queue,
                "Delayed message expired into queue"
            );
        }
    }

    fn schedule_expiry(&self, delay_queue: String, target_queue: String, id: u64, delay: Duration) {
        let transport = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            transport.dead_letter(&delay_queue, &target_queue, id);
        });
    }

    fn decode(&self, queue_name: &str, message: StoredMessage) -> Option<InboundMessage> {
        match serde_json::from_slice::<Value>(&message.body) {
            Ok(data) => {
                let control = InMemoryQueueControl::new(self.clone(), queue_name, data.clone());
                Some(InboundMessage::new(data, Arc::new(control)))
            }
            Err(e) => {
                error!(
                    queue = %queue_name,
                    error = %e,
                    message_body = %String::from_utf8_lossy(&message.body),
                    "Exception while parsing message body"
                );
                self.inner.rejected.fetch_add(1, Ordering::AcqRel);
                None
            }
        }
    }
}

#[async_trait]
impl MessageTransport for InMemoryTransport {
    async fn listen(&self, queue_name: &str) -> MessagingResult<MessageStream> {
        let notify = self.queue_notify(queue_name);
        let state = (self.clone(), queue_name.to_string(), notify);

        let stream = futures::stream::unfold(state, |(transport, queue, notify)| async move {
            loop {
                match transport.pop(&queue) {
                    Some(message) => {
                        if let Some(inbound) = transport.decode(&queue, message) {
                            return Some((inbound, (transport, queue, notify)));
                        }
                    }
                    None => notify.notified().await,
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn publish(
        &self,
        queue_name: &str,
        payload: &Value,
        delay: Duration,
    ) -> MessagingResult<()> {
        let body = serde_json::to_vec(payload)?;

        if delay.is_zero() {
            self.push(queue_name, body);
        } else {
            let delay_queue = delay_queue_name(queue_name);
            let id = self.push(&delay_queue, body);
            self.schedule_expiry(delay_queue, queue_name.to_string(), id, delay);
        }
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

/// Control handle for a message delivered by [`InMemoryTransport`]
pub struct InMemoryQueueControl {
    transport: InMemoryTransport,
    queue_name: String,
    data: Value,
    settle: SettleOnce,
    status: Mutex<ControlStatus>,
}

impl InMemoryQueueControl {
    fn new(transport: InMemoryTransport, queue_name: &str, data: Value) -> Self {
        Self {
            transport,
            queue_name: queue_name.to_string(),
            data,
            settle: SettleOnce::new(),
            status: Mutex::new(ControlStatus::Pending),
        }
    }

    pub fn status(&self) -> ControlStatus {
        *self.status.lock()
    }

    fn mark(&self, status: ControlStatus) {
        *self.status.lock() = status;
        self.transport
            .record_settlement(&self.queue_name, &self.data, status);
    }

    async fn requeue(&self, delay: Duration, status: ControlStatus) -> MessagingResult<()> {
        self.settle
            .run(|| async {
                self.transport
                    .publish(&self.queue_name, &self.data, delay)
                    .await?;
                self.mark(status);
                Ok(())
            })
            .await?;
        Ok(())
    }
}

impl fmt::Debug for InMemoryQueueControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryQueueControl")
            .field("queue_name", &self.queue_name)
            .field("status", &self.status())
            .finish()
    }
}

#[async_trait]
impl QueueControl for InMemoryQueueControl {
    async fn acknowledge(&self) -> MessagingResult<()> {
        self.settle
            .run(|| async {
                self.mark(ControlStatus::Acknowledged);
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn retry(&self) -> MessagingResult<()> {
        self.requeue(self.transport.inner.retry_delay, ControlStatus::Retried)
            .await
    }

    async fn delay(&self, delay: Duration) -> MessagingResult<()> {
        self.requeue(delay, ControlStatus::Delayed(delay)).await
    }

    async fn reject(&self) -> MessagingResult<()> {
        self.settle
            .run(|| async {
                self.mark(ControlStatus::Rejected);
                Ok(())
            })
            .await?;
        Ok(())
    }

    fn is_processed(&self) -> bool {
        self.settle.is_settled()
    }
}
