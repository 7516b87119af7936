//! # Top-Level Error Type
//!
//! Every subsystem has its own `thiserror` enum; `CourierError` unifies them so that
//! routing code can propagate any failure with `?`.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::consumer::ConsumerError;
use crate::database::DatabaseError;
use crate::events::{HandlerError, RegistryError};
use crate::messaging::MessagingError;

#[derive(Error, Debug)]
pub enum CourierError {
    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Consumer(#[from] ConsumerError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CourierError {
    /// The handler error behind this failure, if a handler raised it
    pub fn as_handler_error(&self) -> Option<&HandlerError> {
        match self {
            CourierError::Handler(err) => Some(err),
            _ => None,
        }
    }

    /// True when a handler asked for the event to be retried later
    pub fn is_retry_later(&self) -> bool {
        matches!(self.as_handler_error(), Some(HandlerError::RetryLater { .. }))
    }
}

impl From<sqlx::Error> for CourierError {
    fn from(err: sqlx::Error) -> Self {
        CourierError::Database(err.into())
    }
}

pub type Result<T> = std::result::Result<T, CourierError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_retry_later_detection() {
        let err: CourierError = HandlerError::retry_later(Duration::from_secs(5)).into();
        assert!(err.is_retry_later());

        let err: CourierError = HandlerError::from(anyhow::anyhow!("boom")).into();
        assert!(!err.is_retry_later());
        assert!(err.as_handler_error().is_some());
    }

    #[test]
    fn test_sqlx_error_conversion() {
        let err: CourierError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, CourierError::Database(_)));
    }
}
