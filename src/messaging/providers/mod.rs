//! Messaging provider implementations.

pub mod in_memory;
pub mod rabbitmq;

pub use in_memory::{InMemoryBroker, InMemoryJobQueue, InMemoryProducer};
pub use rabbitmq::{RabbitMqBroker, RabbitMqJobQueue, RabbitMqProducer, RabbitMqPublisher};
