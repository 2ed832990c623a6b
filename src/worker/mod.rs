//! # Worker
//!
//! A worker owns one queue consumer and processes one job at a time,
//! reporting liveness to its supervisor over stdout.

pub mod job_worker;
pub mod lifecycle;
pub mod process;
pub mod protocol;

pub use job_worker::{local_hostname, JobWorker};
pub use lifecycle::{WorkerControl, WorkerLifecycle, WorkerRuntime, WorkerStats};
pub use process::run_worker_process;
pub use protocol::{decode_line, encode_line, ControlMessage, WorkerReport};
