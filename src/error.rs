//! Error types for the task queue.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::lifecycle::StoreError;
use crate::messaging::MessagingError;
use crate::registry::DispatchError;
use crate::state_machine::StateMachineError;

#[derive(Debug, Error)]
pub enum TaskQueueError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("Worker error: {0}")]
    Worker(String),
    #[error("Supervisor error: {0}")]
    Supervisor(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for TaskQueueError {
    fn from(error: serde_json::Error) -> Self {
        TaskQueueError::Validation(format!("JSON serialization error: {error}"))
    }
}

impl TaskQueueError {
    /// Transport faults are fatal to a worker process; everything else is
    /// resolved to a job state or logged.
    pub fn is_transport(&self) -> bool {
        match self {
            TaskQueueError::Messaging(e) => e.is_transport(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TaskQueueError>;
