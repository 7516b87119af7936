//! In-process [`EventStore`] for tests and single-process deployments.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;

use super::{ClaimWork, EventStore};
use crate::error::Result;
use crate::events::record::{EventFilter, EventRecord};

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<String, EventRecord>,
    claimed: HashSet<String>,
    /// Claimed ids reset while their work was still running
    released: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases a claim when the tap future finishes or is dropped
struct ClaimGuard<'a> {
    state: &'a Mutex<StoreState>,
    id: &'a str,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.claimed.remove(self.id);
        state.released.remove(self.id);
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save(&self, record: EventRecord) -> Result<Option<EventRecord>> {
        let mut state = self.state.lock();
        match state.records.get_mut(&record.id) {
            Some(existing) if existing.is_processed() => Ok(None),
            Some(existing) => {
                existing.received_at = record.received_at;
                Ok(Some(existing.clone()))
            }
            None => {
                state.records.insert(record.id.clone(), record.clone());
                Ok(Some(record))
            }
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<EventRecord>> {
        Ok(self.state.lock().records.get(id).cloned())
    }

    async fn tap(&self, id: &str, work: ClaimWork) -> Result<Option<EventRecord>> {
        let record = {
            let mut state = self.state.lock();
            let record = match state.records.get(id) {
                Some(record) if !record.is_processed() => record.clone(),
                _ => return Ok(None),
            };
            if !state.claimed.insert(id.to_string()) {
                return Ok(None);
            }
            record
        };

        let _claim = ClaimGuard {
            state: &self.state,
            id,
        };

        work(record).await?;

        let mut state = self.state.lock();
        let released = state.released.remove(id);
        Ok(state.records.get_mut(id).map(|record| {
            if !released {
                record.processed_at = Some(Utc::now());
            }
            record.clone()
        }))
    }

    fn get_multiple(&self, filter: EventFilter) -> BoxStream<'_, Result<EventRecord>> {
        let mut records: Vec<EventRecord> = self
            .state
            .lock()
            .records
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        records.sort_by_key(|record| record.received_at);

        stream::iter(records.into_iter().map(Ok)).boxed()
    }

    async fn set_unprocessed(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        // A reset that lands before the claim commits must survive the commit
        if state.claimed.contains(id) {
            state.released.insert(id.to_string());
        }
        if let Some(record) = state.records.get_mut(id) {
            record.processed_at = None;
        }
        Ok(())
    }
}
