//! # Event Records
//!
//! Durable idempotency records keyed by event id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use super::event::ParsedEvent;

/// Persisted trace of a received event
///
/// `processed_at` is set exactly once, after every handler for the event ran without error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct EventRecord {
    pub id: String,
    pub event: String,
    pub data: Value,
    pub sent_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    pub rollback: Option<bool>,
}

impl EventRecord {
    /// Record for an event received just now
    pub fn received(event: &ParsedEvent) -> Self {
        let raw = event.raw();
        Self {
            id: raw.id.clone(),
            event: raw.event.clone(),
            data: raw.data.clone(),
            sent_at: raw.sent_at(),
            processed_at: None,
            received_at: Utc::now(),
            rollback: Some(raw.rollback),
        }
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}

/// Filter for [`EventStore::get_multiple`](super::store::EventStore::get_multiple)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// `Some(true)` keeps processed records only, `Some(false)` unprocessed only
    pub processed: Option<bool>,
    /// Keep records whose event type is in this list
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    pub fn processed(mut self, processed: bool) -> Self {
        self.processed = Some(processed);
        self
    }

    pub fn event_types<I, S>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = Some(event_types.into_iter().map(Into::into).collect());
        self
    }

    pub fn matches(&self, record: &EventRecord) -> bool {
        if let Some(processed) = self.processed {
            if record.is_processed() != processed {
                return false;
            }
        }
        match &self.event_types {
            Some(types) => types.iter().any(|t| t == &record.event),
            None => true,
        }
    }
}
