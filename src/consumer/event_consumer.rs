//! # Event Consumer
//!
//! Listen loop for one queue: pull a message, parse it, route it. Events go through the
//! idempotent [`EventRegistry::route`]; tasks through [`EventRegistry::route_task`].
//!
//! Settlement rules:
//! - messages that fail to parse are rejected (no requeue)
//! - routing failures are logged and retried; the retry is a no-op when the dispatcher
//!   already settled the message
//!
//! When the message stream ends the consumer listens again after the reconnect delay.
//! Raising the shutdown signal stops pulling messages, drains in-flight work and waits
//! for every batch to flush before `run` returns.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::worker_pool::WorkerPool;
use crate::config::ConsumerConfig;
use crate::error::Result;
use crate::events::{EventParser, EventRegistry};
use crate::messaging::{InboundMessage, MessageTransport};

/// Which registry entry point a consumer routes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMode {
    /// Idempotent routing backed by the event store
    Events,
    /// Fire-and-forget background tasks
    Tasks,
}

impl fmt::Display for RouteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteMode::Events => f.write_str("events"),
            RouteMode::Tasks => f.write_str("tasks"),
        }
    }
}

pub struct EventConsumer {
    transport: Arc<dyn MessageTransport>,
    registry: Arc<EventRegistry>,
    parser: EventParser,
    config: ConsumerConfig,
}

impl fmt::Debug for EventConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventConsumer")
            .field("provider", &self.transport.provider_name())
            .field("config", &self.config)
            .finish()
    }
}

impl EventConsumer {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        registry: Arc<EventRegistry>,
        config: ConsumerConfig,
    ) -> Self {
        let parser = EventParser::new(Arc::clone(&registry));
        Self {
            transport,
            registry,
            parser,
            config,
        }
    }

    /// Consume `queue_name` until `shutdown` turns `true` or its sender is dropped
    pub async fn run(
        &self,
        queue_name: &str,
        mode: RouteMode,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!(
            queue = %queue_name,
            mode = %mode,
            provider = self.transport.provider_name(),
            max_concurrency = self.config.max_concurrency,
            "Starting event consumer"
        );

        let pool = (self.config.max_concurrency > 1).then(|| {
            WorkerPool::new(
                format!("{queue_name}-workers"),
                self.config.max_concurrency,
                self.config.max_queue_size,
            )
        });

        let result = self
            .consume(queue_name, mode, pool.as_ref(), &mut shutdown)
            .await;

        info!(queue = %queue_name, "Draining event consumer");
        if let Some(pool) = &pool {
            pool.shutdown().await;
        }
        self.registry.processor().wait_idle().await;
        info!(queue = %queue_name, "Event consumer stopped");

        result
    }

    async fn consume(
        &self,
        queue_name: &str,
        mode: RouteMode,
        pool: Option<&WorkerPool>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let mut stream = match self.transport.listen(queue_name).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!(queue = %queue_name, error = %e, "Failed to listen on queue");
                    if wait_or_shutdown(self.config.reconnect_delay(), shutdown).await {
                        return Ok(());
                    }
                    continue;
                }
            };
            debug!(queue = %queue_name, "Listening on queue");

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return Ok(());
                        }
                    }
                    next = stream.next() => match next {
                        Some(message) => {
                            self.dispatch(queue_name, mode, pool, message).await?;
                        }
                        None => {
                            warn!(queue = %queue_name, "Message stream ended, listening again");
                            break;
                        }
                    }
                }
            }

            if wait_or_shutdown(self.config.reconnect_delay(), shutdown).await {
                return Ok(());
            }
        }
    }

    async fn dispatch(
        &self,
        queue_name: &str,
        mode: RouteMode,
        pool: Option<&WorkerPool>,
        message: InboundMessage,
    ) -> Result<()> {
        match pool {
            Some(pool) => {
                let parser = self.parser.clone();
                let registry = Arc::clone(&self.registry);
                let queue = queue_name.to_string();
                pool.submit(async move {
                    process_message(&parser, &registry, &queue, mode, message).await;
                })
                .await?;
            }
            None => {
                process_message(&self.parser, &self.registry, queue_name, mode, message).await;
            }
        }
        Ok(())
    }
}

/// Parse, route and settle one delivery; failures are logged, never returned
pub async fn process_message(
    parser: &EventParser,
    registry: &EventRegistry,
    queue_name: &str,
    mode: RouteMode,
    message: InboundMessage,
) {
    let control = Arc::clone(&message.control);

    let event = match parser.parse(message) {
        Ok(event) => event,
        Err(err) => {
            warn!(queue = %queue_name, error = %err, "Rejecting unprocessable message");
            if let Err(e) = control.reject().await {
                error!(queue = %queue_name, error = %e, "Failed to reject message");
            }
            return;
        }
    };

    let event_id = event.event.id().to_string();
    let routed = match mode {
        RouteMode::Events => registry.route(event).await,
        RouteMode::Tasks => registry.route_task(event).await,
    };

    if let Err(err) = routed {
        error!(
            queue = %queue_name,
            event_id = %event_id,
            error = %err,
            "Failed to route event"
        );
        if let Err(e) = control.retry().await {
            error!(queue = %queue_name, event_id = %event_id, error = %e, "Failed to retry message");
        }
    }
}

/// Sleep for `delay`; returns `true` when shutdown was requested meanwhile
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
