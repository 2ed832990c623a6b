//! # Messaging Service Types

use std::fmt;

/// Handle for acknowledging a received message (the AMQP delivery tag)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub u64);

impl ReceiptHandle {
    pub fn new(tag: u64) -> Self {
        Self(tag)
    }

    pub fn delivery_tag(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message taken off a queue and not yet acknowledged
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub payload: Vec<u8>,
    pub receipt: ReceiptHandle,
    /// Set by the broker when the message was delivered before and not acknowledged
    pub redelivered: bool,
}

impl ReceivedMessage {
    /// Payload as text, for logging
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// A lifecycle event as it went out on the topic exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedEvent {
    pub routing_key: String,
    pub payload: Vec<u8>,
}
