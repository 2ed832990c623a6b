#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

//! # Task Queue
//!
//! A preforking worker pool in front of an AMQP work queue.
//!
//! Producers enqueue job descriptions; a supervised pool of worker processes
//! consumes them one at a time, dispatches each to a handler by `class` and
//! `operation`, and records every state change
//! (submitted → processing → success/error) in PostgreSQL and on the
//! `tq_logging` topic exchange.
//!
//! ## Module Organization
//!
//! - [`supervisor`] - spawns, watches and scales worker processes
//! - [`worker`] - per-process consume loop and the parent/child protocol
//! - [`registry`] / [`handlers`] - handler lookup and the built-in families
//! - [`execution`] - sequential shell command runner
//! - [`lifecycle`] - state persistence, publication and the legacy status log
//! - [`state_machine`] - job states and transitions
//! - [`messaging`] - broker traits with RabbitMQ and in-memory providers
//! - [`producer`] - batch submission
//! - [`config`] / [`logging`] / [`error`] - ambient plumbing
//!
//! ## Acknowledgment discipline
//!
//! A message is acknowledged only after its job reached a terminal state and
//! that state was recorded. Handler and dispatch faults end in `error` and are
//! acknowledged; a worker that dies or stops heartbeating leaves its message
//! unacknowledged, so the broker redelivers it.

pub mod config;
pub mod constants;
pub mod error;
pub mod execution;
pub mod handlers;
pub mod lifecycle;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod producer;
pub mod registry;
pub mod state_machine;
pub mod supervisor;
pub mod worker;

pub use config::{ConfigManager, TaskQueueConfig};
pub use error::{Result, TaskQueueError};
pub use models::Job;
pub use state_machine::JobState;
