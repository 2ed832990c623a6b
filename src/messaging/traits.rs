//! # Messaging Service Traits
//!
//! Provider-agnostic broker operations. Each worker owns one [`JobQueue`];
//! lifecycle publication and enqueuing are separate seams so they can be
//! shared or faked independently.

use std::time::Duration;

use async_trait::async_trait;

use super::types::{ReceiptHandle, ReceivedMessage};
use super::MessagingError;

/// A consumer on a durable queue with manual acknowledgment and prefetch 1
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Wait up to `timeout` for the next message; `Ok(None)` on timeout or after cancel
    async fn receive(&self, timeout: Duration) -> Result<Option<ReceivedMessage>, MessagingError>;

    /// Acknowledge a processed message
    async fn ack(&self, receipt: &ReceiptHandle) -> Result<(), MessagingError>;

    /// Reject a message; `requeue` returns it to the queue for redelivery
    async fn nack(&self, receipt: &ReceiptHandle, requeue: bool) -> Result<(), MessagingError>;

    /// Stop taking new deliveries; in-flight messages can still be acknowledged
    async fn cancel(&self) -> Result<(), MessagingError>;

    /// Close the consumer; unacknowledged messages go back to the queue
    async fn close(&self) -> Result<(), MessagingError>;

    fn queue_name(&self) -> &str;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}

/// Publishes lifecycle events to the logging topic exchange
#[async_trait]
pub trait LifecyclePublisher: Send + Sync {
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), MessagingError>;

    fn provider_name(&self) -> &'static str;
}

/// Enqueues persistent job messages on the work queue
#[async_trait]
pub trait JobProducer: Send + Sync {
    async fn enqueue(&self, payload: &[u8], priority: Option<u8>) -> Result<(), MessagingError>;

    fn provider_name(&self) -> &'static str;
}
