//! # Job Lifecycle
//!
//! Persistence and publication of job state. The tracker drives the state
//! machine and writes through a [`JobStore`]; the status logger maintains the
//! legacy per-collection log from published events.

pub mod collection;
pub mod postgres;
pub mod status_logger;
pub mod store;
pub mod tracker;

pub use collection::{CollectionCache, CollectionKey, CollectionType};
pub use postgres::PgJobStore;
pub use status_logger::StatusLogger;
pub use store::{
    InMemoryJobStore, JobStore, StoreError, StoreResult, StoredJob, TaskLogEntry, TaskLogStore,
};
pub use tracker::LifecycleTracker;
