//! # RabbitMQ Messaging Provider
//!
//! AMQP 0.9.1 implementation of the messaging traits using `lapin`.
//!
//! ## Topology
//!
//! | Object | Kind | Options |
//! |--------|------|---------|
//! | `task_queue` | queue | durable, optional `x-max-priority` |
//! | `tq_logging` | topic exchange | auto-delete |
//! | `tq_log_reader` | queue | durable, bound with `task_queue.*` |
//!
//! Every consumer runs with prefetch 1 and manual acknowledgment. Messages
//! left unacknowledged when a channel or connection closes are redelivered
//! by the broker with the `redelivered` flag set.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::constants::ROUTING_KEY_ALL;
use crate::messaging::traits::{JobProducer, JobQueue, LifecyclePublisher};
use crate::messaging::types::{ReceiptHandle, ReceivedMessage};
use crate::messaging::MessagingError;

const PERSISTENT: u8 = 2;

/// One AMQP connection; channels for consumers and publishers are opened from it
pub struct RabbitMqBroker {
    connection: Connection,
    config: BrokerConfig,
}

impl std::fmt::Debug for RabbitMqBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RabbitMqBroker")
            .field("url", &self.config.url_redacted())
            .field("queue", &self.config.queue)
            .finish()
    }
}

impl RabbitMqBroker {
    pub async fn connect(config: &BrokerConfig) -> Result<Self, MessagingError> {
        let connection = Connection::connect(
            &config.url,
            ConnectionProperties::default()
                .with_connection_name(config.connection_name.clone().into()),
        )
        .await
        .map_err(|e| {
            MessagingError::connection(format!(
                "RabbitMQ connection to {} failed: {e}",
                config.url_redacted()
            ))
        })?;

        info!(url = %config.url_redacted(), "🐇 BROKER: Connected");

        Ok(Self {
            connection,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    async fn channel(&self) -> Result<Channel, MessagingError> {
        self.connection.create_channel().await.map_err(|e| {
            MessagingError::connection(format!("RabbitMQ channel creation failed: {e}"))
        })
    }

    fn work_queue_arguments(&self) -> FieldTable {
        let mut args = FieldTable::default();
        if let Some(max_priority) = self.config.max_priority {
            args.insert(
                "x-max-priority".into(),
                AMQPValue::LongInt(i32::from(max_priority)),
            );
        }
        args
    }

    async fn declare_work_queue(&self, channel: &Channel) -> Result<(), MessagingError> {
        let queue = &self.config.queue;
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                self.work_queue_arguments(),
            )
            .await
            .map_err(|e| MessagingError::queue_operation(queue, "declare", e.to_string()))?;
        Ok(())
    }

    async fn declare_exchange(&self, channel: &Channel) -> Result<(), MessagingError> {
        let exchange = &self.config.exchange;
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::queue_operation(exchange, "declare exchange", e.to_string()))?;
        Ok(())
    }

    /// Consumer on the work queue
    pub async fn job_queue(&self) -> Result<RabbitMqJobQueue, MessagingError> {
        let channel = self.channel().await?;
        self.declare_work_queue(&channel).await?;
        RabbitMqJobQueue::start(channel, self.config.queue.clone()).await
    }

    /// Consumer on the durable log-reader queue bound to every lifecycle event
    pub async fn log_reader(&self) -> Result<RabbitMqJobQueue, MessagingError> {
        let channel = self.channel().await?;
        self.declare_exchange(&channel).await?;

        let queue = &self.config.log_reader_queue;
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::queue_operation(queue, "declare", e.to_string()))?;
        channel
            .queue_bind(
                queue,
                &self.config.exchange,
                ROUTING_KEY_ALL,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::queue_operation(queue, "bind", e.to_string()))?;

        RabbitMqJobQueue::start(channel, queue.clone()).await
    }

    /// Publisher on the lifecycle topic exchange
    pub async fn publisher(&self) -> Result<RabbitMqPublisher, MessagingError> {
        let channel = self.channel().await?;
        self.declare_exchange(&channel).await?;
        Ok(RabbitMqPublisher {
            channel,
            exchange: self.config.exchange.clone(),
        })
    }

    /// Producer on the work queue
    pub async fn producer(&self) -> Result<RabbitMqProducer, MessagingError> {
        let channel = self.channel().await?;
        self.declare_work_queue(&channel).await?;
        Ok(RabbitMqProducer {
            channel,
            queue: self.config.queue.clone(),
        })
    }

    pub async fn close(&self) -> Result<(), MessagingError> {
        self.connection
            .close(200, "closing")
            .await
            .map_err(|e| MessagingError::connection(format!("RabbitMQ close failed: {e}")))
    }
}

/// Manual-ack consumer with prefetch 1
pub struct RabbitMqJobQueue {
    channel: Channel,
    consumer: Mutex<Consumer>,
    queue: String,
    consumer_tag: String,
}

impl RabbitMqJobQueue {
    async fn start(channel: Channel, queue: String) -> Result<Self, MessagingError> {
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| MessagingError::configuration("rabbitmq", format!("Failed to set QoS: {e}")))?;

        let consumer_tag = format!("task-queue-{}-{}", std::process::id(), uuid::Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                &queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::queue_operation(&queue, "consume", e.to_string()))?;

        debug!(queue = %queue, consumer_tag = %consumer_tag, "Consumer started");

        Ok(Self {
            channel,
            consumer: Mutex::new(consumer),
            queue,
            consumer_tag,
        })
    }
}

#[async_trait]
impl JobQueue for RabbitMqJobQueue {
    async fn receive(&self, timeout: Duration) -> Result<Option<ReceivedMessage>, MessagingError> {
        let mut consumer = self.consumer.lock().await;
        match tokio::time::timeout(timeout, consumer.next()).await {
            Err(_) => Ok(None),
            Ok(None) => Err(MessagingError::consumer_closed(&self.queue)),
            Ok(Some(Err(e))) => Err(MessagingError::queue_operation(
                &self.queue,
                "receive",
                e.to_string(),
            )),
            Ok(Some(Ok(delivery))) => Ok(Some(ReceivedMessage {
                receipt: ReceiptHandle::new(delivery.delivery_tag),
                redelivered: delivery.redelivered,
                payload: delivery.data,
            })),
        }
    }

    async fn ack(&self, receipt: &ReceiptHandle) -> Result<(), MessagingError> {
        self.channel
            .basic_ack(receipt.delivery_tag(), BasicAckOptions::default())
            .await
            .map_err(|e| MessagingError::queue_operation(&self.queue, "ack", e.to_string()))
    }

    async fn nack(&self, receipt: &ReceiptHandle, requeue: bool) -> Result<(), MessagingError> {
        self.channel
            .basic_nack(
                receipt.delivery_tag(),
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| MessagingError::queue_operation(&self.queue, "nack", e.to_string()))
    }

    async fn cancel(&self) -> Result<(), MessagingError> {
        self.channel
            .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|e| MessagingError::queue_operation(&self.queue, "cancel", e.to_string()))
    }

    async fn close(&self) -> Result<(), MessagingError> {
        if let Err(e) = self.channel.close(200, "closing").await {
            warn!(queue = %self.queue, error = %e, "Channel close failed");
        }
        Ok(())
    }

    fn queue_name(&self) -> &str {
        &self.queue
    }

    fn provider_name(&self) -> &'static str {
        "rabbitmq"
    }
}

/// Fire-and-forget publisher on the lifecycle exchange
pub struct RabbitMqPublisher {
    channel: Channel,
    exchange: String,
}

#[async_trait]
impl LifecyclePublisher for RabbitMqPublisher {
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), MessagingError> {
        self.channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| MessagingError::publish(&self.exchange, routing_key, e.to_string()))?
            .await
            .map_err(|e| MessagingError::publish(&self.exchange, routing_key, e.to_string()))?;
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "rabbitmq"
    }
}

/// Persistent publisher on the work queue (default exchange)
pub struct RabbitMqProducer {
    channel: Channel,
    queue: String,
}

#[async_trait]
impl JobProducer for RabbitMqProducer {
    async fn enqueue(&self, payload: &[u8], priority: Option<u8>) -> Result<(), MessagingError> {
        let mut properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type("application/json".into());
        if let Some(priority) = priority {
            properties = properties.with_priority(priority);
        }

        self.channel
            .basic_publish("", &self.queue, BasicPublishOptions::default(), payload, properties)
            .await
            .map_err(|e| MessagingError::publish("", &self.queue, e.to_string()))?
            .await
            .map_err(|e| MessagingError::publish("", &self.queue, e.to_string()))?;
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "rabbitmq"
    }
}
