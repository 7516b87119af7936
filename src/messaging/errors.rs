//! # Messaging Error Types
//!
//! Structured error handling for the transport layer using thiserror
//! instead of `Box<dyn Error>` patterns.

use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Queue declaration failed: {queue_name}: {message}")]
    QueueDeclaration { queue_name: String, message: String },

    #[error("Publish failed: {queue_name}: {message}")]
    Publish { queue_name: String, message: String },

    #[error("Consume failed: {queue_name}: {message}")]
    Consume { queue_name: String, message: String },

    #[error("Settling delivery failed: {queue_name}: {operation}: {message}")]
    Settle {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },
}

impl MessagingError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a queue declaration error
    pub fn queue_declaration(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QueueDeclaration {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    /// Create a publish error
    pub fn publish(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    /// Create a consume error
    pub fn consume(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Consume {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    /// Create an error for a failed ack/nack/reject
    pub fn settle(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Settle {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a message serialization error
    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    /// Create a message deserialization error
    pub fn message_deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Conversion from serde_json::Error to MessagingError
impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_eof() {
            MessagingError::message_deserialization(err.to_string())
        } else {
            MessagingError::message_serialization(err.to_string())
        }
    }
}

/// Conversion from lapin errors raised outside a specific queue operation
impl From<lapin::Error> for MessagingError {
    fn from(err: lapin::Error) -> Self {
        MessagingError::connection(err.to_string())
    }
}

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;
