//! # Events Module
//!
//! Typed events, the handler contract, and the registry that routes inbound events to
//! handlers with idempotency backed by an [`EventStore`].

pub mod errors;
pub mod event;
pub mod handler;
pub mod parser;
pub mod record;
pub mod registry;
pub mod store;

pub use errors::{RegistryError, RegistryResult};
pub use event::{ControllableEvent, Event, EventPayload, ParsedEvent, RawEvent};
pub use handler::{
    BatchingSettings, DynEventHandler, EventHandler, HandlerError, HandlerResult, TypedHandler,
};
pub use parser::EventParser;
pub use record::{EventFilter, EventRecord};
pub use registry::EventRegistry;
pub use store::{ClaimWork, EventStore, InMemoryEventStore, PgEventStore};
