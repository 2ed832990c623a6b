//! Job lifecycle tracking: state transitions, persistence and publication.
//!
//! Every transition is written to the job store and then announced on the
//! logging exchange as `task_queue.<state>`. Store and publish failures are
//! logged and never abort the job.

use std::sync::Arc;

use tracing::{debug, warn};

use super::store::{JobStore, StoreResult};
use crate::constants::routing_key;
use crate::logging::{log_error, log_job_operation};
use crate::messaging::LifecyclePublisher;
use crate::models::Job;
use crate::state_machine::{JobEvent, JobState, JobStateMachine, StateMachineResult};

#[derive(Clone)]
pub struct LifecycleTracker {
    store: Arc<dyn JobStore>,
    publisher: Arc<dyn LifecyclePublisher>,
}

impl std::fmt::Debug for LifecycleTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleTracker")
            .field("store", &self.store.store_name())
            .field("publisher", &self.publisher.provider_name())
            .finish()
    }
}

impl LifecycleTracker {
    pub fn new(store: Arc<dyn JobStore>, publisher: Arc<dyn LifecyclePublisher>) -> Self {
        Self { store, publisher }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Persist the full current record: insert on first call (assigning
    /// `job_id`), update by `job_id` afterwards
    pub async fn record(&self, job: &mut Job) -> StoreResult<()> {
        match job.job_id {
            None => {
                let job_id = self.store.insert(job).await?;
                job.job_id = Some(job_id);
                debug!(job_id, state = %job.state, "Job recorded");
            }
            Some(job_id) => {
                let affected = self.store.update(job_id, job).await?;
                if affected == 0 {
                    warn!(job_id, state = %job.state, "No job row updated");
                }
            }
        }
        Ok(())
    }

    /// Announce the record on the logging exchange; failures are only logged
    pub async fn publish(&self, job: &Job) {
        let key = routing_key(job.state.as_str());
        let payload = match job.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                log_error("lifecycle", "publish", &e.to_string(), Some(&key));
                return;
            }
        };
        if let Err(e) = self.publisher.publish(&key, &payload).await {
            warn!(
                job_id = ?job.job_id,
                routing_key = %key,
                error = %e,
                "Lifecycle publish failed"
            );
        }
    }

    /// Record then publish, logging a store failure instead of returning it
    pub async fn record_and_publish(&self, job: &mut Job) {
        if let Err(e) = self.record(job).await {
            log_error(
                "lifecycle",
                "record",
                &e.to_string(),
                Some(&format!("job_id={:?} state={}", job.job_id, job.state)),
            );
        }
        self.publish(job).await;
    }

    /// Apply `event` to the job, then record and publish the new state
    pub async fn transition(&self, job: &mut Job, event: &JobEvent) -> StateMachineResult<JobState> {
        let target = JobStateMachine::determine_target_state(job.state, event)?;
        job.state = target;
        if let Some(message) = event.error_message() {
            if job.output.as_deref().map_or(true, |o| o.trim().is_empty()) {
                job.output = Some(message.to_string());
            }
        }

        log_job_operation(
            event.event_type(),
            job.job_id,
            Some(&job.class),
            Some(&job.operation),
            target.as_str(),
            None,
        );

        self.record_and_publish(job).await;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::store::InMemoryJobStore;
    use crate::messaging::InMemoryBroker;

    fn tracker() -> (LifecycleTracker, Arc<InMemoryJobStore>, InMemoryBroker) {
        let store = Arc::new(InMemoryJobStore::new());
        let broker = InMemoryBroker::new();
        let tracker = LifecycleTracker::new(store.clone(), Arc::new(broker.clone()));
        (tracker, store, broker)
    }

    #[tokio::test]
    async fn test_full_lifecycle_is_recorded_and_published() {
        let (tracker, store, broker) = tracker();
        let mut job = Job::new("util", "ping");

        tracker.transition(&mut job, &JobEvent::Claim).await.unwrap();
        let job_id = job.job_id.unwrap();
        job.output = Some("pong".to_string());
        tracker.transition(&mut job, &JobEvent::Succeed).await.unwrap();

        assert_eq!(job.job_id, Some(job_id));
        assert_eq!(
            store.history(job_id),
            vec![JobState::Processing, JobState::Success]
        );
        let keys: Vec<String> = broker.published().into_iter().map(|e| e.routing_key).collect();
        assert_eq!(keys, vec!["task_queue.processing", "task_queue.success"]);
        assert_eq!(store.job(job_id).unwrap().output.as_deref(), Some("pong"));
    }

    #[tokio::test]
    async fn test_failure_message_becomes_output() {
        let (tracker, store, _) = tracker();
        let mut job = Job::new("nothing", "here");
        tracker.transition(&mut job, &JobEvent::Claim).await.unwrap();
        tracker
            .transition(&mut job, &JobEvent::Fail("unknown handler".to_string()))
            .await
            .unwrap();
        let row = store.job(job.job_id.unwrap()).unwrap();
        assert_eq!(row.state, JobState::Error);
        assert_eq!(row.output.as_deref(), Some("unknown handler"));
    }

    #[tokio::test]
    async fn test_invalid_transition_leaves_job_untouched() {
        let (tracker, store, broker) = tracker();
        let mut job = Job::new("util", "ping");
        job.state = JobState::Success;
        assert!(tracker.transition(&mut job, &JobEvent::Claim).await.is_err());
        assert_eq!(job.state, JobState::Success);
        assert!(store.jobs().is_empty());
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_store_and_broker_failures_are_not_fatal() {
        let (tracker, store, broker) = tracker();
        store.set_failing(true);
        broker.set_disconnected(true);
        let mut job = Job::new("util", "ping");
        let state = tracker.transition(&mut job, &JobEvent::Claim).await.unwrap();
        assert_eq!(state, JobState::Processing);
        assert!(job.job_id.is_none());
    }
}
