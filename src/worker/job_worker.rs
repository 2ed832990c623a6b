//! The concrete worker: claims jobs, runs them through the registry and
//! records every transition.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::lifecycle::{WorkerControl, WorkerLifecycle};
use super::protocol::ControlMessage;
use crate::execution::CommandOutcome;
use crate::lifecycle::LifecycleTracker;
use crate::logging::{log_error, LoggingHandle};
use crate::models::Job;
use crate::registry::{DispatchError, HandlerRegistry};
use crate::state_machine::{JobEvent, JobState};

#[derive(Debug)]
pub struct JobWorker {
    registry: Arc<HandlerRegistry>,
    tracker: LifecycleTracker,
    worker_host: String,
    logging: LoggingHandle,
}

impl JobWorker {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        tracker: LifecycleTracker,
        worker_host: impl Into<String>,
        logging: LoggingHandle,
    ) -> Self {
        Self {
            registry,
            tracker,
            worker_host: worker_host.into(),
            logging,
        }
    }

    pub fn worker_host(&self) -> &str {
        &self.worker_host
    }
}

/// Host name for `worker_host`
pub fn local_hostname() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[async_trait]
impl WorkerLifecycle for JobWorker {
    async fn before_executing(&mut self, job: &mut Job) {
        if job.state != JobState::Submitted {
            // Redelivered after a crash, or republished by hand
            warn!(
                job_id = ?job.job_id,
                state = %job.state,
                "Incoming job not in submitted state, claiming anyway"
            );
            job.state = JobState::Submitted;
        }
        job.mark_started(self.worker_host.clone());
        if let Err(e) = self.tracker.transition(job, &JobEvent::Claim).await {
            log_error("worker", "claim", &e.to_string(), Some(&job.class));
        }
    }

    async fn execute(&mut self, job: &Job) -> Result<CommandOutcome, DispatchError> {
        self.registry.dispatch(job).await
    }

    async fn after_executing(
        &mut self,
        job: &mut Job,
        result: Result<CommandOutcome, DispatchError>,
    ) {
        let event = match result {
            Ok(outcome) if outcome.success => {
                job.mark_completed(outcome.output);
                JobEvent::Succeed
            }
            Ok(outcome) => {
                log_error(
                    "handler",
                    &job.operation,
                    "handler reported failure",
                    Some(&format!(
                        "job_id={:?} class={} output={}",
                        job.job_id, job.class, outcome.output
                    )),
                );
                job.mark_completed(outcome.output);
                JobEvent::Fail(format!("{} {} failed", job.class, job.operation))
            }
            Err(e) => {
                let description = e.to_string();
                log_error(
                    "dispatch",
                    &job.operation,
                    &description,
                    Some(&format!("job_id={:?} class={}", job.job_id, job.class)),
                );
                job.mark_completed(description.clone());
                JobEvent::Fail(description)
            }
        };

        if let Err(e) = self.tracker.transition(job, &event).await {
            log_error("worker", "finish", &e.to_string(), Some(&job.class));
        }
    }

    fn on_control(&mut self, message: ControlMessage) -> WorkerControl {
        match message {
            ControlMessage::Shutdown => {
                info!("🛑 WORKER: Shutdown requested");
                WorkerControl::Stop
            }
            ControlMessage::ReopenLogs => {
                if let Err(e) = self.logging.reopen() {
                    log_error("worker", "reopen_logs", &e.to_string(), None);
                }
                WorkerControl::Continue
            }
        }
    }
}
