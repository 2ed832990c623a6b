//! Legacy status logger: folds lifecycle events into `task_queue_log`.
//!
//! Consumes the durable `tq_log_reader` queue (bound to `task_queue.*`). Each
//! event names an object through `rstar_dir` and its first identifier; the
//! row for that `(collection, identifier)` pair is inserted or updated.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::collection::{CollectionCache, CollectionKey, CollectionType};
use super::store::{TaskLogEntry, TaskLogStore};
use crate::error::{Result, TaskQueueError};
use crate::messaging::{JobQueue, ReceivedMessage};
use crate::models::Job;

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// What happened to one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    /// Row written for `(collection_id, wip_id)`
    Logged { collection_id: i64, wip_id: String },
    /// Event carries no collection or identifier; acknowledged and dropped
    Skipped(String),
}

pub struct StatusLogger {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn TaskLogStore>,
    cache: CollectionCache,
}

impl StatusLogger {
    pub fn new(queue: Arc<dyn JobQueue>, store: Arc<dyn TaskLogStore>) -> Self {
        Self {
            queue,
            store,
            cache: CollectionCache::new(),
        }
    }

    pub fn cache(&self) -> &CollectionCache {
        &self.cache
    }

    /// Consume until `shutdown` is notified or the broker fails.
    ///
    /// A store failure puts the event back on the queue and stops the loop.
    pub async fn run(&self, shutdown: Arc<Notify>) -> Result<()> {
        info!(queue = %self.queue.queue_name(), "📝 STATUS LOG: Consuming lifecycle events");
        loop {
            let message = tokio::select! {
                _ = shutdown.notified() => {
                    info!("📝 STATUS LOG: Shutdown requested");
                    break;
                }
                received = self.queue.receive(RECEIVE_TIMEOUT) => received?,
            };
            let Some(message) = message else { continue };

            match self.handle(&message).await {
                Ok(outcome) => {
                    debug!(?outcome, "Status event handled");
                    self.queue.ack(&message.receipt).await?;
                }
                Err(e) => {
                    self.queue.nack(&message.receipt, true).await?;
                    return Err(e);
                }
            }
        }
        self.queue.close().await?;
        Ok(())
    }

    /// Fold one event into the log
    pub async fn handle(&self, message: &ReceivedMessage) -> Result<StatusOutcome> {
        let job = match Job::from_payload(&message.payload) {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, payload = %message.payload_lossy(), "Unreadable status event");
                return Ok(StatusOutcome::Skipped(e.to_string()));
            }
        };

        let Some(key) = CollectionKey::from_job(&job) else {
            return Ok(StatusOutcome::Skipped("no rstar_dir".to_string()));
        };
        let Some(entry) = TaskLogEntry::from_job(&job) else {
            return Ok(StatusOutcome::Skipped("no identifiers".to_string()));
        };

        let rstar_dir = job.rstar_path().map(|p| p.to_path_buf()).unwrap_or_default();
        let wip_id = entry.wip_id.clone();
        let collection_id = self
            .cache
            .resolve(&key, self.store.as_ref(), move || {
                CollectionType::detect(&rstar_dir, &wip_id)
            })
            .await
            .map_err(TaskQueueError::from)?;

        self.store
            .upsert_task_log(collection_id, &entry)
            .await
            .map_err(TaskQueueError::from)?;

        debug!(
            collection = %key,
            collection_id,
            wip_id = %entry.wip_id,
            state = %entry.state,
            "Status log updated"
        );

        Ok(StatusOutcome::Logged {
            collection_id,
            wip_id: entry.wip_id,
        })
    }
}
