//! # In-Memory Messaging Provider
//!
//! A process-local broker for tests and development. It keeps the parts of
//! AMQP behavior the worker depends on:
//!
//! - priority ordering, FIFO within a priority
//! - unacknowledged messages return to the queue (flagged `redelivered`) when
//!   their consumer is closed or dropped, as when a worker process dies
//! - topic bindings with `*` and `#` wildcards for lifecycle events

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::messaging::traits::{JobProducer, JobQueue, LifecyclePublisher};
use crate::messaging::types::{PublishedEvent, ReceiptHandle, ReceivedMessage};
use crate::messaging::MessagingError;

#[derive(Debug, Clone)]
struct StoredMessage {
    seq: u64,
    payload: Vec<u8>,
    priority: u8,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct InMemoryQueue {
    ready: VecDeque<StoredMessage>,
    /// delivery tag -> (consumer id, message)
    unacked: HashMap<u64, (u64, StoredMessage)>,
}

impl InMemoryQueue {
    fn push(&mut self, message: StoredMessage) {
        self.ready.push_back(message);
    }

    /// Highest priority first, then oldest
    fn take_next(&mut self) -> Option<StoredMessage> {
        let index = self
            .ready
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.priority.cmp(&b.priority).then(b.seq.cmp(&a.seq)))
            .map(|(index, _)| index)?;
        self.ready.remove(index)
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, InMemoryQueue>,
    bindings: Vec<(String, String)>,
    published: Vec<PublishedEvent>,
}

#[derive(Debug, Default)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    notify: Notify,
    next_seq: AtomicU64,
    next_tag: AtomicU64,
    next_consumer: AtomicU64,
    disconnected: AtomicBool,
}

/// Shared in-memory broker; clones refer to the same queues
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `queue` to lifecycle events whose routing key matches `pattern`
    pub fn bind(&self, queue: &str, pattern: &str) {
        let mut state = self.inner.state.lock();
        state.queues.entry(queue.to_string()).or_default();
        state.bindings.push((queue.to_string(), pattern.to_string()));
    }

    /// Consumer on `queue`
    pub fn consumer(&self, queue: &str) -> InMemoryJobQueue {
        self.inner
            .state
            .lock()
            .queues
            .entry(queue.to_string())
            .or_default();
        InMemoryJobQueue {
            broker: self.clone(),
            queue: queue.to_string(),
            consumer_id: self.inner.next_consumer.fetch_add(1, Ordering::Relaxed),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Producer on `queue`
    pub fn producer(&self, queue: &str) -> InMemoryProducer {
        InMemoryProducer {
            broker: self.clone(),
            queue: queue.to_string(),
        }
    }

    /// Put a raw payload on `queue`
    pub fn push(&self, queue: &str, payload: impl Into<Vec<u8>>, priority: Option<u8>) {
        let message = StoredMessage {
            seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
            payload: payload.into(),
            priority: priority.unwrap_or(0),
            redelivered: false,
        };
        self.inner
            .state
            .lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push(message);
        self.inner.notify.notify_waiters();
    }

    /// Messages waiting for delivery on `queue`
    pub fn ready_count(&self, queue: &str) -> usize {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Messages delivered but not yet acknowledged on `queue`
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.unacked.len())
    }

    /// Every lifecycle event published so far
    pub fn published(&self) -> Vec<PublishedEvent> {
        self.inner.state.lock().published.clone()
    }

    /// Simulate losing the broker: every receive and ack fails until reconnected
    pub fn set_disconnected(&self, disconnected: bool) {
        self.inner.disconnected.store(disconnected, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    fn check_connected(&self) -> Result<(), MessagingError> {
        if self.inner.disconnected.load(Ordering::SeqCst) {
            Err(MessagingError::connection("in-memory broker disconnected"))
        } else {
            Ok(())
        }
    }

    fn requeue_consumer(&self, queue: &str, consumer_id: u64) {
        let mut state = self.inner.state.lock();
        if let Some(q) = state.queues.get_mut(queue) {
            let tags: Vec<u64> = q
                .unacked
                .iter()
                .filter(|(_, (owner, _))| *owner == consumer_id)
                .map(|(tag, _)| *tag)
                .collect();
            for tag in tags {
                if let Some((_, mut message)) = q.unacked.remove(&tag) {
                    message.redelivered = true;
                    q.push(message);
                }
            }
        }
        drop(state);
        self.inner.notify.notify_waiters();
    }
}

#[async_trait]
impl LifecyclePublisher for InMemoryBroker {
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), MessagingError> {
        self.check_connected()?;
        let targets: Vec<String> = {
            let mut state = self.inner.state.lock();
            state.published.push(PublishedEvent {
                routing_key: routing_key.to_string(),
                payload: payload.to_vec(),
            });
            state
                .bindings
                .iter()
                .filter(|(_, pattern)| topic_matches(pattern, routing_key))
                .map(|(queue, _)| queue.clone())
                .collect()
        };
        for queue in targets {
            self.push(&queue, payload.to_vec(), None);
        }
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

/// Consumer handle; dropping it returns its unacknowledged messages to the queue
#[derive(Debug)]
pub struct InMemoryJobQueue {
    broker: InMemoryBroker,
    queue: String,
    consumer_id: u64,
    cancelled: AtomicBool,
}

impl InMemoryJobQueue {
    fn try_take(&self) -> Option<ReceivedMessage> {
        let mut state = self.broker.inner.state.lock();
        let queue = state.queues.get_mut(&self.queue)?;
        let message = queue.take_next()?;
        let tag = self.broker.inner.next_tag.fetch_add(1, Ordering::Relaxed) + 1;
        let received = ReceivedMessage {
            payload: message.payload.clone(),
            receipt: ReceiptHandle::new(tag),
            redelivered: message.redelivered,
        };
        queue.unacked.insert(tag, (self.consumer_id, message));
        Some(received)
    }

    fn settle(&self, receipt: &ReceiptHandle, operation: &str) -> Result<StoredMessage, MessagingError> {
        let mut state = self.broker.inner.state.lock();
        state
            .queues
            .get_mut(&self.queue)
            .and_then(|q| q.unacked.remove(&receipt.delivery_tag()))
            .map(|(_, message)| message)
            .ok_or_else(|| {
                MessagingError::queue_operation(
                    &self.queue,
                    operation,
                    format!("unknown delivery tag {receipt}"),
                )
            })
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn receive(&self, timeout: Duration) -> Result<Option<ReceivedMessage>, MessagingError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.broker.inner.notify.notified();
            self.broker.check_connected()?;
            if self.cancelled.load(Ordering::SeqCst) {
                return Ok(None);
            }
            if let Some(message) = self.try_take() {
                return Ok(Some(message));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, receipt: &ReceiptHandle) -> Result<(), MessagingError> {
        self.broker.check_connected()?;
        self.settle(receipt, "ack").map(|_| ())
    }

    async fn nack(&self, receipt: &ReceiptHandle, requeue: bool) -> Result<(), MessagingError> {
        self.broker.check_connected()?;
        let mut message = self.settle(receipt, "nack")?;
        if requeue {
            message.redelivered = true;
            self.broker
                .inner
                .state
                .lock()
                .queues
                .entry(self.queue.clone())
                .or_default()
                .push(message);
            self.broker.inner.notify.notify_waiters();
        }
        Ok(())
    }

    async fn cancel(&self) -> Result<(), MessagingError> {
        self.cancelled.store(true, Ordering::SeqCst);
        self.broker.inner.notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> Result<(), MessagingError> {
        self.cancelled.store(true, Ordering::SeqCst);
        self.broker.requeue_consumer(&self.queue, self.consumer_id);
        Ok(())
    }

    fn queue_name(&self) -> &str {
        &self.queue
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

impl Drop for InMemoryJobQueue {
    fn drop(&mut self) {
        self.broker.requeue_consumer(&self.queue, self.consumer_id);
    }
}

/// Producer handle on one queue
#[derive(Debug, Clone)]
pub struct InMemoryProducer {
    broker: InMemoryBroker,
    queue: String,
}

#[async_trait]
impl JobProducer for InMemoryProducer {
    async fn enqueue(&self, payload: &[u8], priority: Option<u8>) -> Result<(), MessagingError> {
        self.broker.check_connected()?;
        self.broker.push(&self.queue, payload.to_vec(), priority);
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

/// AMQP topic matching: `*` is one word, `#` is zero or more
fn topic_matches(pattern: &str, key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    matches(&pattern, &key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("task_queue.*", "task_queue.success"));
        assert!(!topic_matches("task_queue.*", "task_queue.a.b"));
        assert!(topic_matches("task_queue.#", "task_queue.a.b"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(!topic_matches("task_queue.*", "other.success"));
    }

    #[tokio::test]
    async fn test_priority_then_fifo() {
        let broker = InMemoryBroker::new();
        broker.push("q", b"low".to_vec(), Some(1));
        broker.push("q", b"high-1".to_vec(), Some(9));
        broker.push("q", b"high-2".to_vec(), Some(9));

        let consumer = broker.consumer("q");
        let mut order = Vec::new();
        for _ in 0..3 {
            let message = consumer
                .receive(Duration::from_millis(10))
                .await
                .unwrap()
                .unwrap();
            consumer.ack(&message.receipt).await.unwrap();
            order.push(String::from_utf8(message.payload).unwrap());
        }
        assert_eq!(order, vec!["high-1", "high-2", "low"]);
    }

    #[tokio::test]
    async fn test_receive_times_out_when_empty() {
        let broker = InMemoryBroker::new();
        let consumer = broker.consumer("q");
        let received = consumer.receive(Duration::from_millis(20)).await.unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_dropped_consumer_requeues_unacked() {
        let broker = InMemoryBroker::new();
        broker.push("q", b"job".to_vec(), None);

        let first = broker.consumer("q");
        let message = first.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        assert!(!message.redelivered);
        assert_eq!(broker.unacked_count("q"), 1);
        drop(first);

        assert_eq!(broker.ready_count("q"), 1);
        let second = broker.consumer("q");
        let again = second.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        assert!(again.redelivered);
        assert_eq!(again.payload, b"job".to_vec());
    }

    #[tokio::test]
    async fn test_nack_with_requeue() {
        let broker = InMemoryBroker::new();
        broker.push("q", b"job".to_vec(), None);
        let consumer = broker.consumer("q");
        let message = consumer.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        consumer.nack(&message.receipt, true).await.unwrap();
        assert_eq!(broker.ready_count("q"), 1);
        assert_eq!(broker.unacked_count("q"), 0);
    }

    #[tokio::test]
    async fn test_publish_routes_to_bound_queue() {
        let broker = InMemoryBroker::new();
        broker.bind("tq_log_reader", "task_queue.*");
        broker.publish("task_queue.processing", b"{}").await.unwrap();
        broker.publish("elsewhere.processing", b"{}").await.unwrap();
        assert_eq!(broker.ready_count("tq_log_reader"), 1);
        assert_eq!(broker.published().len(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_is_a_transport_fault() {
        let broker = InMemoryBroker::new();
        let consumer = broker.consumer("q");
        broker.set_disconnected(true);
        let err = consumer.receive(Duration::from_millis(10)).await.unwrap_err();
        assert!(err.is_transport());
    }
}
