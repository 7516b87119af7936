//! # Event Parser
//!
//! Validates inbound JSON against the envelope format and the payload type registered
//! for its event name.

use std::sync::Arc;

use serde_json::Value;
use tracing::error;

use super::errors::{RegistryError, RegistryResult};
use super::event::{ControllableEvent, RawEvent};
use super::registry::EventRegistry;
use crate::messaging::InboundMessage;

#[derive(Debug, Clone)]
pub struct EventParser {
    registry: Arc<EventRegistry>,
}

impl EventParser {
    pub fn new(registry: Arc<EventRegistry>) -> Self {
        Self { registry }
    }

    /// Turn an inbound message into a typed event bound to its control handle
    pub fn parse(&self, message: InboundMessage) -> RegistryResult<ControllableEvent> {
        let InboundMessage { data, control } = message;

        let Some(event_name) = data.get("event").and_then(Value::as_str) else {
            error!(data = %data, "Message has no event type");
            return Err(RegistryError::invalid_envelope("missing \"event\" field"));
        };

        if !self.registry.is_registered(event_name) {
            error!(data = %data, event_type = %event_name, "No handler for event type");
            return Err(RegistryError::unrecognized_event(event_name));
        }

        let raw: RawEvent = serde_json::from_value(data.clone()).map_err(|e| {
            error!(data = %data, error = %e, "Event validation failed");
            RegistryError::invalid_envelope(e.to_string())
        })?;

        let parsed = self.registry.decode(raw).map_err(|e| {
            error!(data = %data, error = %e, "Event validation failed");
            e
        })?;

        Ok(ControllableEvent::new(parsed, control))
    }
}
