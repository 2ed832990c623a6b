//! # Messaging
//!
//! Broker access behind small traits: a work-queue consumer, a lifecycle
//! publisher and a producer. RabbitMQ backs production; the in-memory
//! provider backs tests.

pub mod errors;
pub mod providers;
pub mod traits;
pub mod types;

pub use errors::MessagingError;
pub use providers::{InMemoryBroker, InMemoryJobQueue, RabbitMqBroker, RabbitMqJobQueue};
pub use traits::{JobProducer, JobQueue, LifecyclePublisher};
pub use types::{PublishedEvent, ReceiptHandle, ReceivedMessage};
