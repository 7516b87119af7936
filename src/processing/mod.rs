//! # Processing Module
//!
//! The dispatcher and the per-key batching engine.

pub mod batch;
pub mod batch_registry;
pub mod processor;

pub use batch::EventBatch;
pub use batch_registry::BatchRegistry;
pub use processor::EventBatchProcessor;
