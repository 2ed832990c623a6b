//! # Messaging Error Types
//!
//! Structured errors for broker operations. Everything except serialization
//! and configuration problems is a transport fault.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Publish to {exchange} with key {routing_key} failed: {message}")]
    Publish {
        exchange: String,
        routing_key: String,
        message: String,
    },

    #[error("Consumer on {queue_name} closed by the broker")]
    ConsumerClosed { queue_name: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },
}

impl MessagingError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a queue operation error
    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a publish error
    pub fn publish(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Publish {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            message: message.into(),
        }
    }

    pub fn consumer_closed(queue_name: impl Into<String>) -> Self {
        Self::ConsumerClosed {
            queue_name: queue_name.into(),
        }
    }

    /// Create a message serialization error
    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Whether the broker link itself is broken
    pub fn is_transport(&self) -> bool {
        !matches!(
            self,
            Self::MessageSerialization { .. } | Self::Configuration { .. }
        )
    }
}

impl From<lapin::Error> for MessagingError {
    fn from(error: lapin::Error) -> Self {
        Self::Protocol {
            message: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(error: serde_json::Error) -> Self {
        Self::message_serialization(error.to_string())
    }
}
