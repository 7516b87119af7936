//! # Event Batches
//!
//! An [`EventBatch`] collects the events one handler receives for one batch key and
//! hands them to `handle_batch` together once its window elapses.
//!
//! A batch owns at most one flush task at a time. The task is started by the first
//! `add` into an idle batch and runs as a loop: sleep until the deadline, flush, and
//! keep going while events arrived during the flush (the next deadline is measured from
//! when that flush started). It clears its own handle when the batch is empty, which is
//! what makes the batch eligible for pruning.
//!
//! The whole flush shares one outcome: success acknowledges every event, `RetryLater`
//! delays every event, and any other failure retries every event. Failed events that
//! were routed idempotently get their store record reopened before they are requeued.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::processor::panic_message;
use crate::events::{BatchingSettings, ControllableEvent, DynEventHandler, HandlerError, ParsedEvent};
use crate::messaging::MessagingResult;

#[derive(Default)]
struct BatchState {
    pending: Vec<ControllableEvent>,
    flush_timer: Option<JoinHandle<()>>,
}

pub struct EventBatch {
    handler: Arc<dyn DynEventHandler>,
    settings: BatchingSettings,
    state: Mutex<BatchState>,
    /// Wakes the flush task early once `max_size` events are pending
    flush_now: Notify,
    /// `true` while no flush task is active
    idle: watch::Sender<bool>,
}

impl std::fmt::Debug for EventBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EventBatch")
            .field("handler", &self.handler.identity())
            .field("settings", &self.settings)
            .field("pending", &state.pending.len())
            .field("active_timer", &state.flush_timer.is_some())
            .finish()
    }
}

impl EventBatch {
    pub fn new(handler: Arc<dyn DynEventHandler>) -> Arc<Self> {
        let mut settings = handler.batching_settings();
        // A zero limit would never let a flush take anything
        settings.max_size = settings.max_size.max(1);
        let (idle, _) = watch::channel(true);
        Arc::new(Self {
            handler,
            settings,
            state: Mutex::new(BatchState::default()),
            flush_now: Notify::new(),
            idle,
        })
    }

    /// Create a batch and add `events` to it in order
    pub fn with_events(
        handler: Arc<dyn DynEventHandler>,
        events: impl IntoIterator<Item = ControllableEvent>,
    ) -> Arc<Self> {
        let batch = Self::new(handler);
        for event in events {
            batch.add(event);
        }
        batch
    }

    pub fn settings(&self) -> BatchingSettings {
        self.settings
    }

    /// Queue `event` for the next flush, scheduling one if none is pending
    pub fn add(self: &Arc<Self>, event: ControllableEvent) {
        let mut state = self.state.lock();
        state.pending.push(event);
        let full = state.pending.len() >= self.settings.max_size;

        if state.flush_timer.is_none() {
            let now = Instant::now();
            let deadline = if full { now } else { now + self.settings.window };
            self.idle.send_replace(false);
            state.flush_timer = Some(tokio::spawn(Arc::clone(self).run_flush_timer(deadline)));
        } else if full {
            self.flush_now.notify_one();
        }
    }

    pub fn has_active_timer(&self) -> bool {
        self.state.lock().flush_timer.is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Wait until no flush is scheduled or running
    pub async fn wait_idle(&self) {
        let mut idle = self.idle.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = idle.wait_for(|idle| *idle).await;
    }

    async fn run_flush_timer(self: Arc<Self>, mut deadline: Instant) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                _ = self.flush_now.notified() => {
                    // A wake-up left over from an earlier flush
                    if self.pending_len() < self.settings.max_size {
                        continue;
                    }
                }
            }

            let started = Instant::now();
            self.flush().await;

            let next_deadline = {
                let mut state = self.state.lock();
                if state.pending.is_empty() {
                    state.flush_timer = None;
                    self.idle.send_replace(true);
                    None
                } else if state.pending.len() >= self.settings.max_size {
                    Some(Instant::now())
                } else {
                    Some(started + self.settings.window)
                }
            };

            match next_deadline {
                Some(next) => deadline = next,
                None => return,
            }
        }
    }

    async fn flush(&self) {
        let events: Vec<ControllableEvent> = {
            let mut state = self.state.lock();
            let take = state.pending.len().min(self.settings.max_size);
            state.pending.drain(..take).collect()
        };
        if events.is_empty() {
            return;
        }

        let parsed: Vec<ParsedEvent> = events.iter().map(|e| e.event.clone()).collect();
        let event_ids: Vec<&str> = parsed.iter().map(ParsedEvent::id).collect();

        let outcome = AssertUnwindSafe(self.handler.handle_batch(&parsed))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlerError::Failed(anyhow::anyhow!(panic_message(panic)))));

        match outcome {
            Ok(()) => {
                debug!(
                    handler = %self.handler.identity(),
                    batch_size = events.len(),
                    "Event batch handled"
                );
                for event in &events {
                    log_settle_failure(event, "acknowledge", event.control.acknowledge().await);
                }
            }
            Err(HandlerError::RetryLater { delay }) => {
                release_records(&events).await;
                info!(
                    handler = %self.handler.identity(),
                    event_ids = ?event_ids,
                    delay_ms = delay.as_millis() as u64,
                    "Event batch will be retried later"
                );
                for event in &events {
                    log_settle_failure(event, "delay", event.control.delay(delay).await);
                }
            }
            Err(err) => {
                let payloads: Vec<&serde_json::Value> = parsed.iter().map(|e| &e.raw().data).collect();
                error!(
                    handler = %self.handler.identity(),
                    event_ids = ?event_ids,
                    events = ?payloads,
                    error = %err,
                    "Exception while handling event batch"
                );
                release_records(&events).await;
                for event in &events {
                    log_settle_failure(event, "retry", event.control.retry().await);
                }
            }
        }
    }
}

/// Reopen the idempotency records of a failed batch so redeliveries are handled again
async fn release_records(events: &[ControllableEvent]) {
    for event in events.iter().filter(|e| e.is_tracked()) {
        if let Err(err) = event.mark_unprocessed().await {
            error!(
                event_id = %event.event.id(),
                error = %err,
                "Failed to mark batched event unprocessed"
            );
        }
    }
}

fn log_settle_failure(event: &ControllableEvent, operation: &str, result: MessagingResult<()>) {
    if let Err(err) = result {
        error!(
            event_id = %event.event.id(),
            operation,
            error = %err,
            "Failed to settle batched event"
        );
    }
}
