//! # Message Transport
//!
//! Provider-agnostic abstraction over a durable queue.
//!
//! - `listen` yields a lazy, unbounded stream of inbound messages, each paired with the
//!   [`QueueControl`] handle that settles it. Calling `listen` again starts a fresh
//!   consumer, which is how callers resume after a connection loss.
//! - `publish` with a zero delay goes straight to the queue. A non-zero delay parks the
//!   message on `"<queue>-delay"` until its expiration dead-letters it back into
//!   `<queue>`; the broker does the scheduling, not this process.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use super::control::QueueControl;
use super::MessagingResult;
use crate::constants::broker::DELAY_QUEUE_SUFFIX;

/// A decoded message body and the handle that settles its delivery
#[derive(Clone)]
pub struct InboundMessage {
    pub data: Value,
    pub control: Arc<dyn QueueControl>,
}

impl InboundMessage {
    pub fn new(data: Value, control: Arc<dyn QueueControl>) -> Self {
        Self { data, control }
    }
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("data", &self.data)
            .field("processed", &self.control.is_processed())
            .finish()
    }
}

/// Stream returned by [`MessageTransport::listen`]
pub type MessageStream = BoxStream<'static, InboundMessage>;

#[async_trait]
pub trait MessageTransport: Send + Sync + 'static {
    /// Declare `queue_name` and start consuming it
    async fn listen(&self, queue_name: &str) -> MessagingResult<MessageStream>;

    /// Publish `payload` to `queue_name`, optionally delayed
    async fn publish(
        &self,
        queue_name: &str,
        payload: &Value,
        delay: Duration,
    ) -> MessagingResult<()>;

    /// Close the underlying broker connection
    async fn close(&self) -> MessagingResult<()> {
        Ok(())
    }

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}

/// Name of the auxiliary queue holding delayed copies destined for `queue_name`
pub fn delay_queue_name(queue_name: &str) -> String {
    format!("{queue_name}{DELAY_QUEUE_SUFFIX}")
}
