//! Data carried through the queue and into the job store.

pub mod batch;
pub mod job;

pub use batch::Batch;
pub use job::{Job, JobTimestamp, PayloadError};
