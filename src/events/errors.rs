//! # Registry Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    /// Two payload types claim the same wire name; fatal at startup
    #[error(
        "Event [{event_name}] was already defined by {registered} so it cannot be defined again ({attempted})"
    )]
    DuplicateEvent {
        event_name: String,
        registered: &'static str,
        attempted: &'static str,
    },

    #[error("Unrecognized event type: {event}")]
    UnrecognizedEvent { event: String },

    #[error("Invalid event envelope: {message}")]
    InvalidEnvelope { message: String },

    #[error("Event validation failed for {event}: {message}")]
    InvalidPayload { event: String, message: String },
}

impl RegistryError {
    pub fn unrecognized_event(event: impl Into<String>) -> Self {
        Self::UnrecognizedEvent {
            event: event.into(),
        }
    }

    pub fn invalid_envelope(message: impl Into<String>) -> Self {
        Self::InvalidEnvelope {
            message: message.into(),
        }
    }

    pub fn invalid_payload(event: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            event: event.into(),
            message: message.into(),
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_event_names_both_types() {
        let err = RegistryError::DuplicateEvent {
            event_name: "test".to_string(),
            registered: "app::TestTask",
            attempted: "app::OtherTask",
        };
        let display = err.to_string();
        assert!(display.contains("[test]"));
        assert!(display.contains("app::TestTask"));
        assert!(display.contains("app::OtherTask"));
    }
}
