//! # Batch Registry
//!
//! Lazily created batches keyed by `"<handler identity>:<batch id>"`. A periodic sweep
//! drops batches that have no active flush task, so one-shot batch keys do not
//! accumulate; the next event for a swept key creates a fresh batch.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::batch::EventBatch;
use crate::config::BatchingConfig;
use crate::constants::DEFAULT_BATCH_SWEEP_INTERVAL;
use crate::events::ControllableEvent;

#[derive(Debug)]
pub struct BatchRegistry {
    batches: DashMap<String, Arc<EventBatch>>,
    sweep_interval: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Default for BatchRegistry {
    fn default() -> Self {
        Self::with_sweep_interval(DEFAULT_BATCH_SWEEP_INTERVAL)
    }
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &BatchingConfig) -> Self {
        Self::with_sweep_interval(config.sweep_interval())
    }

    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        Self {
            batches: DashMap::new(),
            sweep_interval,
            sweeper: Mutex::new(None),
        }
    }

    /// Get the batch for `key`, creating it with `factory` on first use
    pub fn get<F>(&self, key: &str, factory: F) -> Arc<EventBatch>
    where
        F: FnOnce() -> Arc<EventBatch>,
    {
        if let Some(batch) = self.batches.get(key) {
            return Arc::clone(batch.value());
        }
        Arc::clone(self.batches.entry(key.to_string()).or_insert_with(factory).value())
    }

    /// Add `event` to the batch for `key`.
    ///
    /// Lookup and add happen under the map entry, so a concurrent sweep cannot drop the
    /// batch between the two.
    pub fn add<F>(&self, key: &str, factory: F, event: ControllableEvent)
    where
        F: FnOnce() -> Arc<EventBatch>,
    {
        let entry = self.batches.entry(key.to_string()).or_insert_with(factory);
        entry.value().add(event);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.batches.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Drop every batch without an active flush task; returns how many were dropped
    pub fn sweep(&self) -> usize {
        let before = self.batches.len();
        self.batches.retain(|_, batch| batch.has_active_timer());
        let removed = before.saturating_sub(self.batches.len());
        if removed > 0 {
            debug!(removed, remaining = self.batches.len(), "Swept idle batches");
        }
        removed
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper.lock().is_some()
    }

    /// Start the periodic sweep; a no-op when it is already running
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }

        let registry: Weak<Self> = Arc::downgrade(self);
        let interval = self.sweep_interval;
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match registry.upgrade() {
                    Some(registry) => {
                        registry.sweep();
                    }
                    None => break,
                }
            }
        }));
    }

    /// Wait for every batch to finish its pending flushes
    pub async fn wait_idle(&self) {
        let batches: Vec<Arc<EventBatch>> = self
            .batches
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        info!(batches = batches.len(), "Waiting for event batches to flush");
        for batch in batches {
            batch.wait_idle().await;
        }
    }

    /// Stop sweeping, flush every batch, then drop the idle ones
    pub async fn shutdown(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        self.wait_idle().await;
        self.sweep();
    }
}

impl Drop for BatchRegistry {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.abort();
        }
    }
}
