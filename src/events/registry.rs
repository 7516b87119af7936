//! # Event Registry
//!
//! Maps event names to their payload type and to the handlers registered for them, and
//! routes inbound events to those handlers.
//!
//! Registration is static: each handler is registered for one concrete payload type,
//! and the registry records a decode function for that type under its
//! [`EventPayload::EVENT_NAME`]. Two different payload types may never share a name.
//!
//! ## Routing
//!
//! - [`EventRegistry::route`] is idempotent: the event is saved to the [`EventStore`],
//!   duplicates of processed events are acknowledged without dispatch, and the handlers
//!   run while the record is claimed, which marks it processed when they all succeed.
//!   Batched handlers only queue the event during the claim; a failed flush reopens the
//!   record so the redelivered copy is handled again.
//! - [`EventRegistry::route_task`] dispatches directly, for fire-and-forget tasks.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::errors::{RegistryError, RegistryResult};
use super::event::{ControllableEvent, EventPayload, ParsedEvent, RawEvent};
use super::handler::{DynEventHandler, EventHandler, TypedHandler};
use super::record::EventRecord;
use super::store::{ClaimWork, EventStore};
use crate::error::Result;
use crate::processing::EventBatchProcessor;

type DecodeFn = fn(RawEvent) -> RegistryResult<ParsedEvent>;

fn decode_payload<T: EventPayload>(raw: RawEvent) -> RegistryResult<ParsedEvent> {
    let payload = serde_json::from_value::<T>(raw.data.clone())
        .map_err(|e| RegistryError::invalid_payload(&raw.event, e.to_string()))?;
    Ok(ParsedEvent::new(raw, payload))
}

struct EventBinding {
    type_id: TypeId,
    type_name: &'static str,
    decode: DecodeFn,
    handlers: Vec<Arc<dyn DynEventHandler>>,
}

pub struct EventRegistry {
    bindings: RwLock<HashMap<&'static str, EventBinding>>,
    store: Arc<dyn EventStore>,
    processor: Arc<EventBatchProcessor>,
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bindings = self.bindings.read();
        let mut events: Vec<_> = bindings
            .iter()
            .map(|(name, binding)| (*name, binding.handlers.len()))
            .collect();
        events.sort_unstable();
        f.debug_struct("EventRegistry")
            .field("events", &events)
            .finish()
    }
}

impl EventRegistry {
    pub fn new(store: Arc<dyn EventStore>, processor: Arc<EventBatchProcessor>) -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            store,
            processor,
        }
    }

    /// Register `handler` for events carrying payload `T`.
    ///
    /// Fails with [`RegistryError::DuplicateEvent`] when `T::EVENT_NAME` is already bound
    /// to a different payload type. Any number of handlers may share one payload type.
    pub fn register<T, H>(&self, handler: Arc<H>) -> RegistryResult<()>
    where
        T: EventPayload,
        H: EventHandler<T>,
    {
        let adapter: Arc<dyn DynEventHandler> = Arc::new(TypedHandler::<T, H>::new(handler));
        let mut bindings = self.bindings.write();

        let binding = bindings.entry(T::EVENT_NAME).or_insert_with(|| EventBinding {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            decode: decode_payload::<T>,
            handlers: Vec::new(),
        });

        if binding.type_id != TypeId::of::<T>() {
            return Err(RegistryError::DuplicateEvent {
                event_name: T::EVENT_NAME.to_string(),
                registered: binding.type_name,
                attempted: std::any::type_name::<T>(),
            });
        }

        info!(
            event_type = T::EVENT_NAME,
            handler = %adapter.identity(),
            "Registered event handler"
        );
        binding.handlers.push(adapter);
        Ok(())
    }

    pub fn is_registered(&self, event: &str) -> bool {
        self.bindings.read().contains_key(event)
    }

    /// Handlers registered for `event`, in registration order
    pub fn handlers_for(&self, event: &str) -> Vec<Arc<dyn DynEventHandler>> {
        self.bindings
            .read()
            .get(event)
            .map(|binding| binding.handlers.clone())
            .unwrap_or_default()
    }

    /// Names of all registered events
    pub fn event_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.bindings.read().keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn processor(&self) -> &Arc<EventBatchProcessor> {
        &self.processor
    }

    /// Decode the payload of `raw` with the type bound to its event name
    pub fn decode(&self, raw: RawEvent) -> RegistryResult<ParsedEvent> {
        let decode = self
            .bindings
            .read()
            .get(raw.event.as_str())
            .map(|binding| binding.decode)
            .ok_or_else(|| RegistryError::unrecognized_event(&raw.event))?;
        decode(raw)
    }

    /// Idempotent dispatch of `event` to every registered handler
    pub async fn route(&self, event: ControllableEvent) -> Result<()> {
        let parsed = &event.event;

        if self
            .store
            .save(EventRecord::received(parsed))
            .await?
            .is_none()
        {
            warn!(
                event_id = %parsed.id(),
                event_type = %parsed.event_type(),
                "Event was already processed"
            );
            event.control.acknowledge().await?;
            return Ok(());
        }

        let handlers = self.handlers_for(parsed.event_type());
        let processor = Arc::clone(&self.processor);
        let dispatched = event.clone().with_store(Arc::clone(&self.store));
        let work: ClaimWork = Box::new(move |_record: EventRecord| {
            async move {
                for handler in handlers {
                    processor.handle(handler, dispatched.clone()).await?;
                }
                Ok(())
            }
            .boxed()
        });

        match self.store.tap(parsed.id(), work).await? {
            Some(_) => {
                debug!(
                    event_id = %parsed.id(),
                    event_type = %parsed.event_type(),
                    "Event processed"
                );
            }
            None => {
                warn!(
                    event_id = %parsed.id(),
                    event_type = %parsed.event_type(),
                    "Event not found or claimed by another consumer"
                );
                event.control.acknowledge().await?;
            }
        }
        Ok(())
    }

    /// Dispatch a background task to every registered handler, without idempotency
    pub async fn route_task(&self, event: ControllableEvent) -> Result<()> {
        info!(
            event_id = %event.event.id(),
            event_type = %event.event.event_type(),
            rollback = event.event.rollback(),
            "Received task"
        );

        for handler in self.handlers_for(event.event.event_type()) {
            self.processor.handle(handler, event.clone()).await?;
        }
        Ok(())
    }
}
