//! # Event Store
//!
//! Durable idempotency records keyed by event id.
//!
//! `save` followed by `tap` gives exactly-once processing on top of an at-least-once
//! transport: `save` filters out ids that were already processed, and `tap` claims the
//! record atomically so that only one consumer runs the handlers for it. The claim work
//! runs inside the store's transaction; `processed_at` is set only when it succeeds.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

use super::record::{EventFilter, EventRecord};
use crate::error::Result;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryEventStore;
pub use postgres::PgEventStore;

/// Work executed while an event record is claimed
pub type ClaimWork = Box<dyn FnOnce(EventRecord) -> BoxFuture<'static, Result<()>> + Send>;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist `record` and return the stored version.
    ///
    /// Returns `None` when a record with the same id has already been processed. An
    /// existing unprocessed record (an earlier attempt failed) is returned so the event
    /// can be claimed again.
    async fn save(&self, record: EventRecord) -> Result<Option<EventRecord>>;

    async fn get_by_id(&self, id: &str) -> Result<Option<EventRecord>>;

    /// Claim the unprocessed record `id` and run `work` with it.
    ///
    /// Returns `None` without running `work` when the record is missing, already
    /// processed, or claimed by someone else. On success the record is marked processed
    /// and returned; an error from `work` leaves it unprocessed and is propagated.
    async fn tap(&self, id: &str, work: ClaimWork) -> Result<Option<EventRecord>>;

    /// Records matching `filter`, oldest received first
    fn get_multiple(&self, filter: EventFilter) -> BoxStream<'_, Result<EventRecord>>;

    /// Clear `processed_at` so the event can be processed again
    async fn set_unprocessed(&self, id: &str) -> Result<()>;
}
