//! # Event Handlers
//!
//! [`EventHandler<T>`] is the contract application handlers implement for one payload type.
//! The registry stores handlers behind the object-safe [`DynEventHandler`]; the
//! [`TypedHandler`] adapter bridges the two by downcasting the decoded payload.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::event::{Event, EventPayload, ParsedEvent};
use crate::constants::{DEFAULT_BATCH_WINDOW, DEFAULT_MAX_BATCH_SIZE, DEFAULT_RETRY_LATER_DELAY};

/// How a batching handler wants its events grouped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchingSettings {
    /// How long a batch collects events before it is flushed
    pub window: Duration,
    /// Maximum events per flush; reaching it flushes early
    pub max_size: usize,
}

impl Default for BatchingSettings {
    fn default() -> Self {
        Self {
            window: DEFAULT_BATCH_WINDOW,
            max_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

/// Outcome of a failed handler call
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Recoverable condition; the delivery is redelivered after `delay`
    #[error("Retry later requested (delay {delay:?})")]
    RetryLater { delay: Duration },

    #[error("Handler does not implement {operation}")]
    NotImplemented { operation: &'static str },

    #[error("Event {event} does not carry a {expected} payload")]
    PayloadMismatch { event: String, expected: &'static str },

    /// Any other failure; the delivery is retried after the default delay
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn retry_later(delay: Duration) -> Self {
        Self::RetryLater { delay }
    }

    /// Retry later after the default delay
    pub fn retry_soon() -> Self {
        Self::retry_later(DEFAULT_RETRY_LATER_DELAY)
    }

    pub fn not_implemented(operation: &'static str) -> Self {
        Self::NotImplemented { operation }
    }

    /// The delay requested by a `RetryLater` signal
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::RetryLater { delay } => Some(*delay),
            _ => None,
        }
    }
}

pub type HandlerResult<T = ()> = Result<T, HandlerError>;

/// Application handler for events carrying payload `T`
///
/// Only `handle` is required. Handlers that return a key from `batch_id` receive events
/// through `handle_batch` instead, grouped per key within `batching_settings().window`.
#[async_trait]
pub trait EventHandler<T: EventPayload>: Send + Sync + 'static {
    /// Name used in logs and batch keys
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn handle(&self, event: Event<T>) -> HandlerResult;

    /// Undo the effects of a previously handled event
    async fn rollback(&self, _event: Event<T>) -> HandlerResult {
        Err(HandlerError::not_implemented("rollback"))
    }

    async fn handle_batch(&self, _events: Vec<Event<T>>) -> HandlerResult {
        Err(HandlerError::not_implemented("handle_batch"))
    }

    fn batching_settings(&self) -> BatchingSettings {
        BatchingSettings::default()
    }

    /// Batch key for `event`; `None` handles the event immediately
    fn batch_id(&self, _event: &Event<T>) -> Option<String> {
        None
    }
}

/// Type-erased handler as stored by the registry
#[async_trait]
pub trait DynEventHandler: Send + Sync {
    /// Unique per registration; batch keys are scoped by it
    fn identity(&self) -> &str;

    fn event_name(&self) -> &'static str;

    fn batching_settings(&self) -> BatchingSettings;

    fn batch_id(&self, event: &ParsedEvent) -> HandlerResult<Option<String>>;

    async fn handle(&self, event: &ParsedEvent) -> HandlerResult;

    async fn rollback(&self, event: &ParsedEvent) -> HandlerResult;

    async fn handle_batch(&self, events: &[ParsedEvent]) -> HandlerResult;
}

static NEXT_HANDLER_SEQ: AtomicU64 = AtomicU64::new(1);

/// Adapter from [`EventHandler<T>`] to [`DynEventHandler`]
pub struct TypedHandler<T, H> {
    handler: Arc<H>,
    identity: String,
    _payload: PhantomData<fn() -> T>,
}

impl<T, H> TypedHandler<T, H>
where
    T: EventPayload,
    H: EventHandler<T>,
{
    pub fn new(handler: Arc<H>) -> Self {
        let seq = NEXT_HANDLER_SEQ.fetch_add(1, Ordering::Relaxed);
        let identity = format!("{}#{seq}", handler.name());
        Self {
            handler,
            identity,
            _payload: PhantomData,
        }
    }

    fn typed(&self, event: &ParsedEvent) -> HandlerResult<Event<T>> {
        event
            .downcast::<T>()
            .ok_or_else(|| HandlerError::PayloadMismatch {
                event: event.event_type().to_string(),
                expected: std::any::type_name::<T>(),
            })
    }
}

#[async_trait]
impl<T, H> DynEventHandler for TypedHandler<T, H>
where
    T: EventPayload,
    H: EventHandler<T>,
{
    fn identity(&self) -> &str {
        &self.identity
    }

    fn event_name(&self) -> &'static str {
        T::EVENT_NAME
    }

    fn batching_settings(&self) -> BatchingSettings {
        self.handler.batching_settings()
    }

    fn batch_id(&self, event: &ParsedEvent) -> HandlerResult<Option<String>> {
        let typed = self.typed(event)?;
        Ok(self.handler.batch_id(&typed))
    }

    async fn handle(&self, event: &ParsedEvent) -> HandlerResult {
        let typed = self.typed(event)?;
        self.handler.handle(typed).await
    }

    async fn rollback(&self, event: &ParsedEvent) -> HandlerResult {
        let typed = self.typed(event)?;
        self.handler.rollback(typed).await
    }

    async fn handle_batch(&self, events: &[ParsedEvent]) -> HandlerResult {
        let typed = events
            .iter()
            .map(|event| self.typed(event))
            .collect::<HandlerResult<Vec<_>>>()?;
        self.handler.handle_batch(typed).await
    }
}
