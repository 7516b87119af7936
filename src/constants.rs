//! # System Constants
//!
//! Defaults and naming conventions shared by the transport, batching engine and
//! consumer. Configuration values override the tunable ones at runtime.

use std::time::Duration;

/// Broker-level naming conventions for delayed delivery
pub mod broker {
    /// Suffix of the auxiliary queue that holds delayed copies of a message
    pub const DELAY_QUEUE_SUFFIX: &str = "-delay";

    /// Direct exchange that expired delayed messages are dead-lettered through
    pub const DEAD_LETTER_EXCHANGE: &str = "dlx-exchange";

    pub const CONTENT_TYPE_JSON: &str = "application/json";

    /// AMQP delivery mode for messages that survive broker restarts
    pub const PERSISTENT_DELIVERY_MODE: u8 = 2;
}

/// Delay applied by `QueueControl::retry`
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Delay carried by `HandlerError::RetryLater` when the handler does not pick one
pub const DEFAULT_RETRY_LATER_DELAY: Duration = Duration::from_secs(5);

/// Default time window a batch collects events before flushing
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_secs(1);

/// Default upper bound on the number of events handed to a single batch call
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

/// How often the batch registry drops batches without an active flush timer
pub const DEFAULT_BATCH_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Poll interval for advisory transaction locks acquired with a timeout
pub const ADVISORY_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Queue used for background tasks when none is configured
pub const DEFAULT_TASK_QUEUE_NAME: &str = "tasks";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_defaults() {
        assert_eq!(DEFAULT_RETRY_DELAY, Duration::from_secs(5));
        assert_eq!(DEFAULT_BATCH_WINDOW, Duration::from_secs(1));
        assert_eq!(DEFAULT_MAX_BATCH_SIZE, 1000);
        assert_eq!(broker::DELAY_QUEUE_SUFFIX, "-delay");
    }
}
