//! Shared fixtures for integration tests: a recording handler, envelopes, and a wired
//! in-memory pipeline (transport, event store, batch engine, registry).

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::events::{
    BatchingSettings, ControllableEvent, Event, EventHandler, EventParser, EventPayload,
    EventRegistry, HandlerError, HandlerResult, InMemoryEventStore,
};
use courier_core::messaging::{InMemoryTransport, MessageStream, MessageTransport};
use courier_core::processing::{BatchRegistry, EventBatchProcessor};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const QUEUE: &str = "events";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub value: String,
}

impl EventPayload for Task {
    const EVENT_NAME: &'static str = "test";
}

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Succeed,
    Fail,
    RetryLater(Duration),
}

/// Handler that records what it receives and answers with a fixed behavior
#[derive(Debug)]
pub struct RecordingHandler {
    batch_key: Option<String>,
    settings: BatchingSettings,
    behavior: Mutex<Behavior>,
    latency: Duration,
    handled: Mutex<Vec<Event<Task>>>,
    rolled_back: Mutex<Vec<String>>,
    batches: Mutex<Vec<Vec<String>>>,
}

impl RecordingHandler {
    pub fn immediate() -> Self {
        Self::new(None)
    }

    /// Batches everything under one key with a 100ms window
    pub fn batching(key: &str) -> Self {
        Self::new(Some(key.to_string()))
    }

    fn new(batch_key: Option<String>) -> Self {
        Self {
            batch_key,
            settings: BatchingSettings {
                window: Duration::from_millis(100),
                ..BatchingSettings::default()
            },
            behavior: Mutex::new(Behavior::Succeed),
            latency: Duration::ZERO,
            handled: Mutex::new(Vec::new()),
            rolled_back: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn with_behavior(self, behavior: Behavior) -> Self {
        *self.behavior.lock() = behavior;
        self
    }

    /// Every call takes `latency` before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn handled_ids(&self) -> Vec<String> {
        self.handled.lock().iter().map(|e| e.id.clone()).collect()
    }

    pub fn handled(&self) -> Vec<Event<Task>> {
        self.handled.lock().clone()
    }

    pub fn rolled_back(&self) -> Vec<String> {
        self.rolled_back.lock().clone()
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().clone()
    }

    async fn answer(&self) -> HandlerResult {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let behavior = *self.behavior.lock();
        match behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(anyhow::anyhow!("handler failed").into()),
            Behavior::RetryLater(delay) => Err(HandlerError::retry_later(delay)),
        }
    }
}

#[async_trait]
impl EventHandler<Task> for RecordingHandler {
    fn name(&self) -> &str {
        "recording"
    }

    async fn handle(&self, event: Event<Task>) -> HandlerResult {
        self.handled.lock().push(event);
        self.answer().await
    }

    async fn rollback(&self, event: Event<Task>) -> HandlerResult {
        self.rolled_back.lock().push(event.id);
        self.answer().await
    }

    async fn handle_batch(&self, events: Vec<Event<Task>>) -> HandlerResult {
        self.batches
            .lock()
            .push(events.iter().map(|e| e.id.clone()).collect());
        self.handled.lock().extend(events);
        self.answer().await
    }

    fn batching_settings(&self) -> BatchingSettings {
        self.settings
    }

    fn batch_id(&self, _event: &Event<Task>) -> Option<String> {
        self.batch_key.clone()
    }
}

pub fn envelope(id: &str, value: &str, rollback: bool) -> Value {
    json!({
        "id": id,
        "event": "test",
        "data": {"value": value},
        "timestamp": 1_700_000_000.0,
        "rollback": rollback,
    })
}

/// In-memory transport, store and registry wired together
pub struct Pipeline {
    pub transport: InMemoryTransport,
    pub store: Arc<InMemoryEventStore>,
    pub batches: Arc<BatchRegistry>,
    pub registry: Arc<EventRegistry>,
    pub parser: EventParser,
}

impl Pipeline {
    pub fn new() -> Self {
        let transport = InMemoryTransport::new();
        let store = Arc::new(InMemoryEventStore::new());
        let batches = Arc::new(BatchRegistry::new());
        let processor = Arc::new(EventBatchProcessor::new(Arc::clone(&batches)));
        let registry = Arc::new(EventRegistry::new(store.clone(), processor));
        let parser = EventParser::new(Arc::clone(&registry));
        Self {
            transport,
            store,
            batches,
            registry,
            parser,
        }
    }

    pub fn register(&self, handler: &Arc<RecordingHandler>) {
        self.registry
            .register::<Task, _>(Arc::clone(handler))
            .expect("handler registers");
    }

    pub async fn publish(&self, body: Value) {
        self.transport
            .publish(QUEUE, &body, Duration::ZERO)
            .await
            .expect("publish succeeds");
    }

    pub async fn listen(&self) -> MessageStream {
        self.transport.listen(QUEUE).await.expect("listen succeeds")
    }

    /// Pull the next message from `stream` and parse it
    pub async fn next_event(&self, stream: &mut MessageStream) -> ControllableEvent {
        let message = stream.next().await.expect("message available");
        self.parser.parse(message).expect("message parses")
    }
}
