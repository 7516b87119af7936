//! # Transport Providers
//!
//! - [`RabbitMqTransport`]: production provider over AMQP (lapin)
//! - [`InMemoryTransport`]: in-process provider for tests and local development

pub mod in_memory;
pub mod rabbitmq;

pub use in_memory::{InMemoryQueueControl, InMemoryTransport, Settlement};
pub use rabbitmq::{RabbitMqQueueControl, RabbitMqTransport};
