#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, RabbitMQ in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Courier Core
//!
//! Event-processing layer between a durable message broker and application handlers.
//!
//! ## Overview
//!
//! The broker delivers at least once; this crate adds idempotent *processing* on top.
//! Inbound messages are parsed into typed events, claimed exactly once in an event
//! store, and dispatched to handlers either immediately or through time-windowed
//! batches. Handler outcomes map onto the delivery's control handle: success
//! acknowledges, `RetryLater` delays, anything else retries.
//!
//! ## Module Organization
//!
//! - [`messaging`] - Transport abstraction, control handles, delayed delivery, emitters
//! - [`events`] - Typed events, handler contract, registry, parser, event store
//! - [`processing`] - Dispatcher and the per-key batching engine
//! - [`database`] - Nested transactions and advisory locks on PostgreSQL
//! - [`consumer`] - Listen loops and the bounded worker pool
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured `tracing` setup
//! - [`error`] - Top-level error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use courier_core::config::ConfigLoader;
//! use courier_core::consumer::{EventConsumer, RouteMode};
//! use courier_core::events::{Event, EventHandler, EventPayload, EventRegistry, HandlerResult};
//! use courier_core::events::InMemoryEventStore;
//! use courier_core::messaging::RabbitMqTransport;
//! use courier_core::processing::{BatchRegistry, EventBatchProcessor};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct OrderPlaced {
//!     order_id: u64,
//! }
//!
//! impl EventPayload for OrderPlaced {
//!     const EVENT_NAME: &'static str = "order_placed";
//! }
//!
//! struct SendReceipt;
//!
//! #[async_trait]
//! impl EventHandler<OrderPlaced> for SendReceipt {
//!     async fn handle(&self, event: Event<OrderPlaced>) -> HandlerResult {
//!         println!("receipt for order {}", event.data.order_id);
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! courier_core::logging::init_structured_logging();
//! let config = ConfigLoader::new("config").load()?;
//!
//! let batches = Arc::new(BatchRegistry::from_config(&config.batching));
//! let processor = Arc::new(EventBatchProcessor::new(batches));
//! let registry = Arc::new(EventRegistry::new(Arc::new(InMemoryEventStore::new()), processor));
//! registry.register::<OrderPlaced, _>(Arc::new(SendReceipt))?;
//!
//! let transport = Arc::new(RabbitMqTransport::new(&config.broker).await?);
//! let consumer = EventConsumer::new(transport, registry, config.consumer.clone());
//!
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! consumer.run("orders", RouteMode::Events, shutdown_rx).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! In-memory implementations of the transport and the event store make the whole
//! pipeline testable without a broker or database. Tests that need RabbitMQ or
//! PostgreSQL are `#[ignore]`d; run them with `cargo test -- --ignored` once
//! `RABBITMQ_URL` / `DATABASE_URL` point at live services.

pub mod config;
pub mod constants;
pub mod consumer;
pub mod database;
pub mod error;
pub mod events;
pub mod logging;
pub mod messaging;
pub mod processing;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{ConfigLoader, CourierConfig};
pub use consumer::{EventConsumer, RouteMode};
pub use database::{Database, IsolationLevel};
pub use error::{CourierError, Result};
pub use events::{
    ControllableEvent, Event, EventHandler, EventPayload, EventRegistry, HandlerError,
    HandlerResult,
};
pub use messaging::{MessageTransport, QueueControl};
pub use processing::{BatchRegistry, EventBatchProcessor};
