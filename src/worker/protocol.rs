//! Parent/child channel between the supervisor and its workers.
//!
//! One JSON object per line. Workers write [`WorkerReport`]s to stdout and
//! read [`ControlMessage`]s from stdin; EOF on stdin means the supervisor is
//! gone.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::state_machine::JobState;

/// Worker -> supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReport {
    Heartbeat,
    JobStarted {
        class: String,
        operation: String,
        job_id: Option<i64>,
    },
    JobFinished {
        job_id: Option<i64>,
        state: JobState,
    },
}

/// Supervisor -> worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Finish the in-flight job, then exit
    Shutdown,
    ReopenLogs,
}

/// Serialize `message` as one newline-terminated line
pub fn encode_line<T: Serialize>(message: &T) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line<T: DeserializeOwned>(line: &str) -> serde_json::Result<T> {
    serde_json::from_str(line.trim())
}
