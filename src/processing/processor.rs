//! # Event Batch Processor
//!
//! Decides per handler whether an event is handled now or joins a batch. Immediate
//! outcomes are settled here; batched events are settled by their [`EventBatch`] at
//! flush time. The first batched event starts the registry's periodic sweep.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info};

use super::batch::EventBatch;
use super::batch_registry::BatchRegistry;
use crate::error::{CourierError, Result};
use crate::events::{ControllableEvent, DynEventHandler, HandlerError, HandlerResult};

#[derive(Debug)]
pub struct EventBatchProcessor {
    batches: Arc<BatchRegistry>,
}

impl EventBatchProcessor {
    pub fn new(batches: Arc<BatchRegistry>) -> Self {
        Self { batches }
    }

    pub fn batches(&self) -> &Arc<BatchRegistry> {
        &self.batches
    }

    /// Hand `event` to `handler`, batched when the handler returns a batch key.
    ///
    /// Immediate failures settle the control handle (`delay` for `RetryLater`, `retry`
    /// otherwise) and are then returned to the caller.
    pub async fn handle(
        &self,
        handler: Arc<dyn DynEventHandler>,
        event: ControllableEvent,
    ) -> Result<()> {
        let batch_id = match handler.batch_id(&event.event) {
            Ok(batch_id) => batch_id,
            Err(err) => return self.settle_failure(handler.as_ref(), &event, err).await,
        };

        match batch_id {
            Some(batch_id) => {
                let key = format!("{}:{batch_id}", handler.identity());
                debug!(
                    event_id = %event.event.id(),
                    batch_key = %key,
                    "Adding event to batch"
                );
                self.batches.start_sweeper();
                self.batches
                    .add(&key, || EventBatch::new(Arc::clone(&handler)), event);
                Ok(())
            }
            None => self.handle_immediate(handler.as_ref(), event).await,
        }
    }

    async fn handle_immediate(
        &self,
        handler: &dyn DynEventHandler,
        event: ControllableEvent,
    ) -> Result<()> {
        match call_handler(handler, &event).await {
            Ok(()) => {
                debug!(
                    event_id = %event.event.id(),
                    handler = %handler.identity(),
                    "Event handled"
                );
                event.control.acknowledge().await?;
                Ok(())
            }
            Err(err) => self.settle_failure(handler, &event, err).await,
        }
    }

    async fn settle_failure(
        &self,
        handler: &dyn DynEventHandler,
        event: &ControllableEvent,
        err: HandlerError,
    ) -> Result<()> {
        match err.retry_delay() {
            Some(delay) => {
                info!(
                    event_id = %event.event.id(),
                    handler = %handler.identity(),
                    delay_ms = delay.as_millis() as u64,
                    "Event will be retried later"
                );
                event.control.delay(delay).await?;
            }
            None => {
                error!(
                    event_id = %event.event.id(),
                    handler = %handler.identity(),
                    event = %event.event.raw().data,
                    error = %err,
                    "Exception while handling event"
                );
                event.control.retry().await?;
            }
        }
        Err(CourierError::Handler(err))
    }

    /// Wait until every batch has flushed its pending events
    pub async fn wait_idle(&self) {
        self.batches.wait_idle().await;
    }

    /// Wait for every batch to flush and stop the sweeper
    pub async fn shutdown(&self) {
        self.batches.shutdown().await;
    }
}

async fn call_handler(handler: &dyn DynEventHandler, event: &ControllableEvent) -> HandlerResult {
    let call = if event.event.rollback() {
        handler.rollback(&event.event)
    } else {
        handler.handle(&event.event)
    };

    AssertUnwindSafe(call)
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(HandlerError::Failed(anyhow::anyhow!(panic_message(panic)))))
}

/// Readable message from a caught handler panic
pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {message}")
    } else {
        "handler panicked".to_string()
    }
}
