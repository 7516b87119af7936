//! # Messaging Module
//!
//! Durable-queue transport for events and background tasks.
//!
//! - [`MessageTransport`]: provider-agnostic `listen`/`publish` with broker-side delayed delivery
//! - [`QueueControl`]: per-delivery acknowledge/retry/delay/reject, settled at most once
//! - [`EventEmitter`]/[`TaskEmitter`]: typed publishing helpers
//! - Providers: RabbitMQ (lapin) and in-memory

pub mod control;
pub mod emitter;
pub mod errors;
pub mod providers;
pub mod transport;

pub use control::{ControlStatus, QueueControl, SettleOnce};
pub use emitter::{EventEmitter, TaskEmitter};
pub use errors::{MessagingError, MessagingResult};
pub use providers::{
    InMemoryQueueControl, InMemoryTransport, RabbitMqQueueControl, RabbitMqTransport, Settlement,
};
pub use transport::{delay_queue_name, InboundMessage, MessageStream, MessageTransport};
