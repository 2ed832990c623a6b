use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::StateMachineError;

/// Job lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Enqueued by a producer, not yet claimed
    #[default]
    #[serde(alias = "pending")]
    Submitted,
    /// Claimed by a worker and running
    Processing,
    /// Handler reported success
    Success,
    /// Handler failed or the job could not be dispatched
    Error,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Submitted,
        JobState::Processing,
        JobState::Success,
        JobState::Error,
    ];

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Processing)
    }

    /// Position along submitted -> processing -> terminal
    pub fn rank(&self) -> u8 {
        match self {
            Self::Submitted => 0,
            Self::Processing => 1,
            Self::Success | Self::Error => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = StateMachineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" | "pending" => Ok(Self::Submitted),
            "processing" => Ok(Self::Processing),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            _ => Err(StateMachineError::UnknownState(s.to_string())),
        }
    }
}
