//! # Consumer Module
//!
//! Long-running listen loops that feed inbound messages into the event registry,
//! optionally through a bounded worker pool.

pub mod errors;
pub mod event_consumer;
pub mod worker_pool;

pub use errors::{ConsumerError, ConsumerResult};
pub use event_consumer::{process_message, EventConsumer, RouteMode};
pub use worker_pool::WorkerPool;
