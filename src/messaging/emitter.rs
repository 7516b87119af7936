//! # Event and Task Emitters
//!
//! Typed publishing helpers on top of [`MessageTransport`]. An [`EventEmitter`] publishes
//! already-built events to a fixed queue; a [`TaskEmitter`] wraps a task payload into a
//! fresh event and publishes it to the task queue.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::CourierConfig;
use crate::events::{Event, EventPayload};
use crate::messaging::transport::MessageTransport;
use crate::messaging::MessagingResult;

/// Publishes typed events to one queue
#[derive(Clone)]
pub struct EventEmitter {
    transport: Arc<dyn MessageTransport>,
    queue_name: String,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("provider", &self.transport.provider_name())
            .field("queue_name", &self.queue_name)
            .finish()
    }
}

impl EventEmitter {
    pub fn new(transport: Arc<dyn MessageTransport>, queue_name: impl Into<String>) -> Self {
        Self {
            transport,
            queue_name: queue_name.into(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Publish `event`, visible to consumers after `delay`
    pub async fn emit<T: EventPayload>(
        &self,
        event: &Event<T>,
        delay: Duration,
    ) -> MessagingResult<()> {
        let body = serde_json::to_value(event)?;

        info!(
            event_id = %event.id,
            event_type = %event.event,
            queue = %self.queue_name,
            delay_ms = delay.as_millis() as u64,
            "Emitting event"
        );

        self.transport.publish(&self.queue_name, &body, delay).await
    }
}

/// Publishes background tasks of payload type `T`
pub struct TaskEmitter<T> {
    emitter: EventEmitter,
    _payload: PhantomData<fn(T)>,
}

impl<T> Clone for TaskEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            emitter: self.emitter.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T: EventPayload> TaskEmitter<T> {
    pub fn new(transport: Arc<dyn MessageTransport>, task_queue_name: impl Into<String>) -> Self {
        Self {
            emitter: EventEmitter::new(transport, task_queue_name),
            _payload: PhantomData,
        }
    }

    /// Emitter for the task queue named in `config`
    pub fn from_config(transport: Arc<dyn MessageTransport>, config: &CourierConfig) -> Self {
        Self::new(transport, config.task_queue_name.clone())
    }

    pub fn queue_name(&self) -> &str {
        self.emitter.queue_name()
    }

    /// Wrap `task` in a new event and publish it; returns the event id
    pub async fn emit(&self, task: T, rollback: bool, delay: Duration) -> MessagingResult<String> {
        let mut event = Event::new(task);
        event.rollback = rollback;
        self.emitter.emit(&event, delay).await?;
        Ok(event.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::InMemoryTransport;
    use crate::test_utils::TestTask;

    #[tokio::test]
    async fn test_event_emitter_publishes_envelope() {
        let transport = InMemoryTransport::new();
        let emitter = EventEmitter::new(Arc::new(transport.clone()), "events");

        let event = Event::new(TestTask::new("1"));
        emitter.emit(&event, Duration::ZERO).await.unwrap();

        let messages = transport.messages("events");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["id"], event.id.as_str());
        assert_eq!(messages[0]["event"], "test");
        assert_eq!(messages[0]["data"]["value"], "1");
        assert_eq!(messages[0]["rollback"], false);
    }

    #[tokio::test]
    async fn test_task_emitter_uses_configured_queue() {
        let transport = InMemoryTransport::new();
        let config = CourierConfig {
            task_queue_name: "background".to_string(),
            ..CourierConfig::default()
        };
        let emitter = TaskEmitter::<TestTask>::from_config(Arc::new(transport.clone()), &config);
        assert_eq!(emitter.queue_name(), "background");

        emitter
            .emit(TestTask::new("now"), false, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(transport.queue_depth("background"), 1);

        let defaulted =
            TaskEmitter::<TestTask>::from_config(Arc::new(transport), &CourierConfig::default());
        assert_eq!(defaulted.queue_name(), "tasks");
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_emitter_delays_onto_task_queue() {
        let transport = InMemoryTransport::new();
        let emitter = TaskEmitter::<TestTask>::new(Arc::new(transport.clone()), "tasks");

        let id = emitter
            .emit(TestTask::new("later"), true, Duration::from_secs(3))
            .await
            .unwrap();

        assert_eq!(transport.queue_depth("tasks"), 0);
        let parked = transport.messages("tasks-delay");
        assert_eq!(parked[0]["id"], id.as_str());
        assert_eq!(parked[0]["rollback"], true);
    }
}
