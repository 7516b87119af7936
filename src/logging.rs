//! # Structured Logging Module
//!
//! Environment-aware `tracing` setup. `RUST_LOG` wins when set; otherwise the level is
//! derived from the environment. Production (or `COURIER_LOG_FORMAT=json`) logs JSON
//! lines, everything else logs human-readable output.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));

        let layer = if use_json_format(&environment) {
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(false)
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_filter(filter)
                .boxed()
        };

        // Embedding applications may already have installed a subscriber
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
            return;
        }

        tracing::info!(environment = %environment, "Structured logging initialized");
    });
}

/// Current environment from `COURIER_ENV`, then `APP_ENV`, defaulting to `development`
pub fn get_environment() -> String {
    std::env::var("COURIER_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Default log level for an environment
pub fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        "test" => "warn".to_string(),
        _ => "debug".to_string(),
    }
}

fn use_json_format(environment: &str) -> bool {
    match std::env::var("COURIER_LOG_FORMAT") {
        Ok(format) => format.eq_ignore_ascii_case("json"),
        Err(_) => environment == "production",
    }
}
