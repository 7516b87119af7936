//! # Delivery Control
//!
//! Every delivered message comes with a [`QueueControl`] handle that settles it in
//! exactly one way: acknowledge, retry, delay, or reject. Providers guard their
//! handles with [`SettleOnce`] so that only the first successful settlement takes
//! effect; later calls are silent no-ops.
//!
//! Retry and delay do not use broker-native requeue. They publish a copy of the
//! message with a delay and then acknowledge the original delivery, so a retried
//! message re-enters at the back of the queue.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::MessagingResult;

/// Per-delivery settlement capability
#[async_trait]
pub trait QueueControl: Send + Sync + fmt::Debug {
    /// Mark the message permanently consumed
    async fn acknowledge(&self) -> MessagingResult<()>;

    /// Redeliver the message after the provider's default retry delay
    async fn retry(&self) -> MessagingResult<()>;

    /// Redeliver the message after `delay`
    async fn delay(&self, delay: Duration) -> MessagingResult<()>;

    /// Negatively acknowledge without requeue; used for messages that can never be processed
    async fn reject(&self) -> MessagingResult<()>;

    /// Whether one of the settlement operations has already taken effect
    fn is_processed(&self) -> bool;
}

/// Observable outcome of a control handle, used by the in-memory provider and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlStatus {
    #[default]
    Pending,
    Acknowledged,
    Retried,
    Delayed(Duration),
    Rejected,
}

impl ControlStatus {
    pub fn is_settled(&self) -> bool {
        !matches!(self, ControlStatus::Pending)
    }
}

impl fmt::Display for ControlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlStatus::Pending => write!(f, "pending"),
            ControlStatus::Acknowledged => write!(f, "acked"),
            ControlStatus::Retried => write!(f, "retried"),
            ControlStatus::Delayed(delay) => write!(f, "delayed({delay:?})"),
            ControlStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// At-most-once settlement guard.
///
/// Callers are serialized on an async mutex, so two concurrent settlements can never
/// both run. The processed flag flips only after the action succeeds: a failed publish
/// or ack leaves the delivery settleable by a later call.
#[derive(Debug, Default)]
pub struct SettleOnce {
    lock: Mutex<()>,
    settled: AtomicBool,
}

impl SettleOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` unless the delivery was already settled.
    ///
    /// Returns `Ok(true)` when this call settled the delivery, `Ok(false)` when it was a no-op.
    pub async fn run<F, Fut>(&self, action: F) -> MessagingResult<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = MessagingResult<()>>,
    {
        let _guard = self.lock.lock().await;
        if self.settled.load(Ordering::Acquire) {
            return Ok(false);
        }

        action().await?;
        self.settled.store(true, Ordering::Release);
        Ok(true)
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }
}
