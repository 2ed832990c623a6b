use serde::{Deserialize, Serialize};

/// One producer invocation; jobs created together share a `batch_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub user_id: String,
    /// Command line that created the batch
    pub cmd_line: String,
}

impl Batch {
    pub fn new(user_id: impl Into<String>, cmd_line: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            cmd_line: cmd_line.into(),
        }
    }
}
