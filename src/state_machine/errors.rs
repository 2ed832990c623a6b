use thiserror::Error;

/// Error types for job state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Invalid job state: {0}")]
    UnknownState(String),
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
