//! # RabbitMQ Transport
//!
//! RabbitMQ implementation of [`MessageTransport`] using the `lapin` crate.
//!
//! ## Features
//!
//! - **Durable Queues**: declared durable, non-exclusive, non-auto-delete before use
//! - **Persistent Messages**: JSON bodies published with delivery mode 2 and publisher confirms
//! - **Delayed Delivery**: copies parked on `"<queue>-delay"` with a per-message expiration,
//!   dead-lettered through the shared direct exchange back into `<queue>`
//! - **Prefetch Control**: backpressure via consumer prefetch limits
//!
//! ## Usage
//!
//! ```ignore
//! use courier_core::config::RabbitmqConfig;
//! use courier_core::messaging::{MessageTransport, RabbitMqTransport};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = RabbitMqTransport::new(&RabbitmqConfig::default()).await?;
//!
//! // Redelivered into "orders" ten seconds from now
//! transport
//!     .publish("orders", &serde_json::json!({"id": "1"}), Duration::from_secs(10))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::config::RabbitmqConfig;
use crate::constants::broker::{
    CONTENT_TYPE_JSON, DEAD_LETTER_EXCHANGE, PERSISTENT_DELIVERY_MODE,
};
use crate::messaging::control::{QueueControl, SettleOnce};
use crate::messaging::transport::{
    delay_queue_name, InboundMessage, MessageStream, MessageTransport,
};
use crate::messaging::{MessagingError, MessagingResult};

/// RabbitMQ-based transport
///
/// Cheap to clone; clones share the connection and the publishing channel.
#[derive(Debug, Clone)]
pub struct RabbitMqTransport {
    inner: Arc<RabbitMqInner>,
}

#[derive(Debug)]
struct RabbitMqInner {
    connection: Connection,
    /// Channel for publishing and topology declarations
    channel: Channel,
    config: RabbitmqConfig,
    consumer_seq: AtomicU64,
}

impl RabbitMqTransport {
    /// Connect using a configuration reference
    pub async fn new(config: &RabbitmqConfig) -> MessagingResult<Self> {
        Self::from_config(config.clone()).await
    }

    /// Connect, taking ownership of the configuration
    pub async fn from_config(config: RabbitmqConfig) -> MessagingResult<Self> {
        let connection = Connection::connect(
            &config.url,
            ConnectionProperties::default()
                .with_connection_name(config.connection_name.clone().into()),
        )
        .await
        .map_err(|e| MessagingError::connection(format!("RabbitMQ connection failed: {e}")))?;

        let channel = Self::open_channel(&connection, &config).await?;

        info!(
            url = %redact_url(&config.url),
            prefetch_count = config.prefetch_count,
            "Connected to RabbitMQ"
        );

        Ok(Self {
            inner: Arc::new(RabbitMqInner {
                connection,
                channel,
                config,
                consumer_seq: AtomicU64::new(1),
            }),
        })
    }

    /// Connection settings this transport was created with
    pub fn config(&self) -> &RabbitmqConfig {
        &self.inner.config
    }

    async fn open_channel(
        connection: &Connection,
        config: &RabbitmqConfig,
    ) -> MessagingResult<Channel> {
        let channel = connection.create_channel().await.map_err(|e| {
            MessagingError::connection(format!("RabbitMQ channel creation failed: {e}"))
        })?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| {
                MessagingError::configuration("rabbitmq", format!("Failed to set QoS: {e}"))
            })?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| {
                MessagingError::configuration(
                    "rabbitmq",
                    format!("Failed to enable publisher confirms: {e}"),
                )
            })?;

        Ok(channel)
    }

    async fn declare_queue(channel: &Channel, queue_name: &str) -> MessagingResult<()> {
        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::queue_declaration(queue_name, e.to_string()))?;

        Ok(())
    }

    /// Declare the delay queue and the dead-letter route back to the original queue.
    ///
    /// Runs on every delayed publish; all declarations are idempotent on the broker.
    async fn declare_delay_queue(
        &self,
        delay_queue: &str,
        original_queue: &str,
    ) -> MessagingResult<()> {
        let channel = &self.inner.channel;

        Self::declare_queue(channel, original_queue).await?;

        channel
            .exchange_declare(
                DEAD_LETTER_EXCHANGE,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                MessagingError::queue_declaration(
                    DEAD_LETTER_EXCHANGE,
                    format!("Dead-letter exchange declaration failed: {e}"),
                )
            })?;

        let mut args = FieldTable::default();
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(DEAD_LETTER_EXCHANGE.into()),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(original_queue.into()),
        );

        channel
            .queue_declare(
                delay_queue,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                args,
            )
            .await
            .map_err(|e| MessagingError::queue_declaration(delay_queue, e.to_string()))?;

        channel
            .queue_bind(
                original_queue,
                DEAD_LETTER_EXCHANGE,
                original_queue,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                MessagingError::queue_declaration(
                    original_queue,
                    format!("Dead-letter binding failed: {e}"),
                )
            })?;

        Ok(())
    }

    fn message_properties() -> BasicProperties {
        BasicProperties::default()
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_content_type(CONTENT_TYPE_JSON.into())
    }

    async fn basic_publish(
        &self,
        routing_key: &str,
        body: &[u8],
        properties: BasicProperties,
    ) -> MessagingResult<()> {
        let confirm = self
            .inner
            .channel
            .basic_publish(
                "", // Default exchange
                routing_key,
                BasicPublishOptions {
                    mandatory: true,
                    ..Default::default()
                },
                body,
                properties,
            )
            .await
            .map_err(|e| MessagingError::publish(routing_key, format!("Publish failed: {e}")))?;

        let confirmation = confirm.await.map_err(|e| {
            MessagingError::publish(routing_key, format!("Publish confirmation failed: {e}"))
        })?;

        if confirmation.is_nack() {
            return Err(MessagingError::publish(
                routing_key,
                "Broker negatively acknowledged the message",
            ));
        }

        Ok(())
    }

    async fn publish_immediate(&self, queue_name: &str, body: &[u8]) -> MessagingResult<()> {
        Self::declare_queue(&self.inner.channel, queue_name).await?;
        self.basic_publish(queue_name, body, Self::message_properties())
            .await?;

        debug!(queue = %queue_name, "Published message");
        Ok(())
    }

    async fn publish_delayed(
        &self,
        queue_name: &str,
        body: &[u8],
        delay: Duration,
    ) -> MessagingResult<()> {
        let delay_queue = delay_queue_name(queue_name);
        self.declare_delay_queue(&delay_queue, queue_name).await?;

        let properties = Self::message_properties()
            .with_expiration(ShortString::from(delay.as_millis().to_string()));
        self.basic_publish(&delay_queue, body, properties).await?;

        debug!(
            queue = %queue_name,
            delay_queue = %delay_queue,
            delay_ms = delay.as_millis() as u64,
            "Published delayed message"
        );
        Ok(())
    }

    /// Decode a delivery body into an inbound message.
    ///
    /// Undecodable bodies never reach the registry: they are nacked without requeue.
    async fn decode_delivery(&self, queue_name: &str, delivery: Delivery) -> Option<InboundMessage> {
        match serde_json::from_slice::<Value>(&delivery.data) {
            Ok(data) => {
                let control = RabbitMqQueueControl::new(
                    delivery.acker,
                    data.clone(),
                    self.clone(),
                    queue_name,
                    self.inner.config.retry_delay(),
                );
                Some(InboundMessage::new(data, Arc::new(control)))
            }
            Err(e) => {
                error!(
                    queue = %queue_name,
                    error = %e,
                    message_body = %String::from_utf8_lossy(&delivery.data),
                    "Exception while parsing message body"
                );

                if let Err(nack_err) = delivery
                    .acker
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    })
                    .await
                {
                    error!(
                        queue = %queue_name,
                        error = %nack_err,
                        "Failed to reject undecodable message"
                    );
                }
                None
            }
        }
    }
}

#[async_trait]
impl MessageTransport for RabbitMqTransport {
    async fn listen(&self, queue_name: &str) -> MessagingResult<MessageStream> {
        // Each consumer gets its own channel so prefetch applies per listener
        let channel = Self::open_channel(&self.inner.connection, &self.inner.config).await?;
        Self::declare_queue(&channel, queue_name).await?;

        let consumer_tag = format!(
            "{}-{}-{}",
            self.inner.config.connection_name,
            queue_name,
            self.inner.consumer_seq.fetch_add(1, Ordering::Relaxed)
        );

        let consumer = channel
            .basic_consume(
                queue_name,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::consume(queue_name, e.to_string()))?;

        info!(queue = %queue_name, consumer_tag = %consumer_tag, "Started consuming queue");

        let transport = self.clone();
        let queue = queue_name.to_string();
        let stream = consumer.filter_map(move |delivery| {
            // The consumer channel lives as long as the stream
            let _channel = &channel;
            let transport = transport.clone();
            let queue = queue.clone();
            async move {
                match delivery {
                    Ok(delivery) => transport.decode_delivery(&queue, delivery).await,
                    Err(e) => {
                        error!(queue = %queue, error = %e, "Consumer delivery failed");
                        None
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn publish(
        &self,
        queue_name: &str,
        payload: &Value,
        delay: Duration,
    ) -> MessagingResult<()> {
        let body = serde_json::to_vec(payload)?;

        if delay.is_zero() {
            self.publish_immediate(queue_name, &body).await
        } else {
            self.publish_delayed(queue_name, &body, delay).await
        }
    }

    async fn close(&self) -> MessagingResult<()> {
        self.inner
            .connection
            .close(200, "Normal shutdown")
            .await
            .map_err(|e| MessagingError::connection(format!("RabbitMQ close failed: {e}")))?;

        info!("Closed RabbitMQ connection");
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "rabbitmq"
    }
}

/// Control handle for a single RabbitMQ delivery
pub struct RabbitMqQueueControl {
    acker: Acker,
    data: Value,
    transport: RabbitMqTransport,
    queue_name: String,
    retry_delay: Duration,
    settle: SettleOnce,
}

impl RabbitMqQueueControl {
    fn new(
        acker: Acker,
        data: Value,
        transport: RabbitMqTransport,
        queue_name: &str,
        retry_delay: Duration,
    ) -> Self {
        Self {
            acker,
            data,
            transport,
            queue_name: queue_name.to_string(),
            retry_delay,
            settle: SettleOnce::new(),
        }
    }

    async fn ack_delivery(&self) -> MessagingResult<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| MessagingError::settle(&self.queue_name, "ack", e.to_string()))
    }
}

impl fmt::Debug for RabbitMqQueueControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RabbitMqQueueControl")
            .field("queue_name", &self.queue_name)
            .field("retry_delay", &self.retry_delay)
            .field("processed", &self.settle.is_settled())
            .finish()
    }
}

#[async_trait]
impl QueueControl for RabbitMqQueueControl {
    async fn acknowledge(&self) -> MessagingResult<()> {
        self.settle.run(|| self.ack_delivery()).await?;
        Ok(())
    }

    async fn retry(&self) -> MessagingResult<()> {
        self.delay(self.retry_delay).await
    }

    async fn delay(&self, delay: Duration) -> MessagingResult<()> {
        self.settle
            .run(|| async {
                self.transport
                    .publish(&self.queue_name, &self.data, delay)
                    .await?;
                self.ack_delivery().await
            })
            .await?;
        Ok(())
    }

    async fn reject(&self) -> MessagingResult<()> {
        self.settle
            .run(|| async {
                self.acker
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    })
                    .await
                    .map(|_| ())
                    .map_err(|e| MessagingError::settle(&self.queue_name, "nack", e.to_string()))
            })
            .await?;
        Ok(())
    }

    fn is_processed(&self) -> bool {
        self.settle.is_settled()
    }
}

/// Strip credentials from a broker url before logging it
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}***{}", &url[..scheme_end + 3], &url[at..])
        }
        _ => url.to_string(),
    }
}
