//! Names shared by producers, workers and subscribers.

/// Durable work queue carrying job messages
pub const TASK_QUEUE: &str = "task_queue";

/// Topic exchange carrying lifecycle events
pub const LOGGING_EXCHANGE: &str = "tq_logging";

/// Durable queue used by the legacy status logger
pub const LOG_READER_QUEUE: &str = "tq_log_reader";

/// Routing key prefix for lifecycle events; the full key is `task_queue.<state>`
pub const ROUTING_KEY_PREFIX: &str = "task_queue";

/// Binding pattern matching every lifecycle event
pub const ROUTING_KEY_ALL: &str = "task_queue.*";

/// Highest message priority accepted by the work queue
pub const DEFAULT_MAX_PRIORITY: u8 = 10;

/// Wall-clock format used for `started`/`completed` (second resolution)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Subcommand used when the supervisor re-executes itself as a worker
pub const WORKER_SUBCOMMAND: &str = "worker";

/// Environment variable selecting development/test/production defaults
pub const ENVIRONMENT_VAR: &str = "TASK_QUEUE_ENV";

/// Build the lifecycle routing key for a state name
pub fn routing_key(state: &str) -> String {
    format!("{ROUTING_KEY_PREFIX}.{state}")
}
