//! # Events
//!
//! Typed events and the JSON envelope they travel in.
//!
//! Every message on the transport is an envelope
//! `{id, event, data, timestamp, rollback?}`. The `event` name selects the payload type
//! registered for it; payload types name themselves through [`EventPayload::EVENT_NAME`]
//! instead of being discovered at runtime.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::store::EventStore;
use crate::error::Result;
use crate::messaging::QueueControl;

/// A payload type that can travel inside an [`Event`]
pub trait EventPayload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Wire name carried in the envelope's `event` field
    const EVENT_NAME: &'static str;
}

/// Immutable event envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<T> {
    pub id: String,
    pub event: String,
    pub data: T,
    /// Seconds since the Unix epoch, as set by the sender
    pub timestamp: f64,
    #[serde(default)]
    pub rollback: bool,
}

/// Envelope with an undecoded payload
pub type RawEvent = Event<Value>;

impl<T: EventPayload> Event<T> {
    /// Create a fresh event with a random id and the current timestamp
    pub fn new(data: T) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event: T::EVENT_NAME.to_string(),
            data,
            timestamp: unix_timestamp(Utc::now()),
            rollback: false,
        }
    }
}

impl<T> Event<T> {
    pub fn with_rollback(mut self, rollback: bool) -> Self {
        self.rollback = rollback;
        self
    }

    /// Sender timestamp as a UTC date time
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        if !self.timestamp.is_finite() {
            return None;
        }
        let secs = self.timestamp.floor();
        let nanos = ((self.timestamp - secs) * 1e9).round().min(999_999_999.0);
        DateTime::from_timestamp(secs as i64, nanos as u32)
    }
}

fn unix_timestamp(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

/// A validated event whose payload has been decoded into its registered type
#[derive(Clone)]
pub struct ParsedEvent {
    raw: Arc<RawEvent>,
    payload: Arc<dyn Any + Send + Sync>,
}

impl ParsedEvent {
    pub fn new<T: EventPayload>(raw: RawEvent, payload: T) -> Self {
        Self {
            raw: Arc::new(raw),
            payload: Arc::new(payload),
        }
    }

    pub fn id(&self) -> &str {
        &self.raw.id
    }

    pub fn event_type(&self) -> &str {
        &self.raw.event
    }

    pub fn rollback(&self) -> bool {
        self.raw.rollback
    }

    pub fn timestamp(&self) -> f64 {
        self.raw.timestamp
    }

    /// The envelope exactly as received
    pub fn raw(&self) -> &RawEvent {
        &self.raw
    }

    /// Typed view of this event, `None` when `T` is not the decoded payload type
    pub fn downcast<T: EventPayload>(&self) -> Option<Event<T>> {
        let data = self.payload.downcast_ref::<T>()?.clone();
        Some(Event {
            id: self.raw.id.clone(),
            event: self.raw.event.clone(),
            data,
            timestamp: self.raw.timestamp,
            rollback: self.raw.rollback,
        })
    }
}

impl fmt::Debug for ParsedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedEvent").field("raw", &self.raw).finish()
    }
}

/// A parsed event together with the handle that settles its delivery
///
/// Events routed idempotently also carry the store that holds their record, so work
/// that fails after the claim was committed (a batch flush) can release the record.
#[derive(Clone)]
pub struct ControllableEvent {
    pub event: ParsedEvent,
    pub control: Arc<dyn QueueControl>,
    store: Option<Arc<dyn EventStore>>,
}

impl ControllableEvent {
    pub fn new(event: ParsedEvent, control: Arc<dyn QueueControl>) -> Self {
        Self {
            event,
            control,
            store: None,
        }
    }

    /// Attach the store holding this event's idempotency record
    pub fn with_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn is_tracked(&self) -> bool {
        self.store.is_some()
    }

    /// Clear `processed_at` on the event's record so a redelivery is handled again.
    ///
    /// No-op for events that were not routed through the store.
    pub async fn mark_unprocessed(&self) -> Result<()> {
        match &self.store {
            Some(store) => store.set_unprocessed(self.event.id()).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ControllableEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllableEvent")
            .field("event", &self.event)
            .field("control", &self.control)
            .field("tracked", &self.store.is_some())
            .finish()
    }
}
