//! # Worker Lifecycle
//!
//! [`WorkerLifecycle`] is the set of hooks a worker implements;
//! [`WorkerRuntime`] owns the queue consumer and drives the hooks one
//! message at a time:
//!
//! 1. receive (waiting at most one heartbeat interval)
//! 2. parse; bytes that are not a JSON object are rejected back to the queue
//! 3. `before_executing`, then `execute`, then `after_executing`
//! 4. acknowledge
//!
//! A malformed job object skips `execute` and is finished as a dispatch
//! fault. Broker errors end the loop with an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::protocol::{ControlMessage, WorkerReport};
use crate::error::Result;
use crate::execution::CommandOutcome;
use crate::messaging::{JobQueue, ReceivedMessage};
use crate::models::{Job, PayloadError};
use crate::registry::DispatchError;

/// Pause after rejecting a message; with prefetch 1 it comes straight back
const REJECT_BACKOFF: Duration = Duration::from_secs(1);

/// What the runtime should do after a control message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerControl {
    Continue,
    Stop,
}

#[async_trait]
pub trait WorkerLifecycle: Send {
    /// Claim the job: stamp it and move it to processing
    async fn before_executing(&mut self, job: &mut Job);

    /// Run the job's handler
    async fn execute(&mut self, job: &Job) -> std::result::Result<CommandOutcome, DispatchError>;

    /// Finish the job from the handler result
    async fn after_executing(
        &mut self,
        job: &mut Job,
        result: std::result::Result<CommandOutcome, DispatchError>,
    );

    /// React to a supervisor command between jobs
    fn on_control(&mut self, message: ControlMessage) -> WorkerControl;
}

/// Totals for one runtime session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub rejected: u64,
}

pub struct WorkerRuntime<W: WorkerLifecycle> {
    worker: W,
    queue: Arc<dyn JobQueue>,
    reports: mpsc::UnboundedSender<WorkerReport>,
    control: mpsc::UnboundedReceiver<ControlMessage>,
    heartbeat_interval: Duration,
    stats: WorkerStats,
}

impl<W: WorkerLifecycle> WorkerRuntime<W> {
    pub fn new(
        worker: W,
        queue: Arc<dyn JobQueue>,
        reports: mpsc::UnboundedSender<WorkerReport>,
        control: mpsc::UnboundedReceiver<ControlMessage>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            worker,
            queue,
            reports,
            control,
            heartbeat_interval,
            stats: WorkerStats::default(),
        }
    }

    pub fn worker(&self) -> &W {
        &self.worker
    }

    /// Consume until told to stop. A closed control channel counts as shutdown.
    #[instrument(skip(self), fields(queue = %self.queue.queue_name()))]
    pub async fn run(mut self) -> Result<WorkerStats> {
        info!(
            provider = self.queue.provider_name(),
            "🚀 WORKER: Waiting for jobs"
        );
        self.report(WorkerReport::Heartbeat);

        loop {
            tokio::select! {
                biased;
                control = self.control.recv() => {
                    let message = control.unwrap_or(ControlMessage::Shutdown);
                    debug!(?message, "Control message");
                    if self.worker.on_control(message) == WorkerControl::Stop {
                        break;
                    }
                }
                received = self.queue.receive(self.heartbeat_interval) => {
                    if let Some(message) = received? {
                        self.process(message).await?;
                    }
                    self.report(WorkerReport::Heartbeat);
                }
            }
        }

        info!(
            processed = self.stats.processed,
            rejected = self.stats.rejected,
            "🛑 WORKER: Stopping"
        );
        self.queue.cancel().await?;
        self.queue.close().await?;
        Ok(self.stats)
    }

    async fn process(&mut self, message: ReceivedMessage) -> Result<()> {
        if message.redelivered {
            warn!(receipt = ?message.receipt, "Processing a redelivered message");
        }

        let (mut job, result) = match Job::from_payload(&message.payload) {
            Ok(mut job) => {
                self.start(&mut job).await;
                let result = self.worker.execute(&job).await;
                (job, result)
            }
            Err(PayloadError::Malformed { job, reason }) => {
                let mut job = *job;
                warn!(class = %job.class, reason = %reason, "Malformed job payload");
                self.start(&mut job).await;
                (job, Err(DispatchError::MalformedPayload(reason)))
            }
            Err(e @ PayloadError::NotAnObject(_)) => {
                warn!(
                    error = %e,
                    payload = %message.payload_lossy(),
                    "Rejecting unparseable message"
                );
                self.queue.nack(&message.receipt, true).await?;
                self.stats.rejected += 1;
                tokio::time::sleep(REJECT_BACKOFF).await;
                return Ok(());
            }
        };

        self.worker.after_executing(&mut job, result).await;
        self.report(WorkerReport::JobFinished {
            job_id: job.job_id,
            state: job.state,
        });

        self.queue.ack(&message.receipt).await?;
        self.stats.processed += 1;
        Ok(())
    }

    async fn start(&mut self, job: &mut Job) {
        self.worker.before_executing(job).await;
        self.report(WorkerReport::JobStarted {
            class: job.class.clone(),
            operation: job.operation.clone(),
            job_id: job.job_id,
        });
    }

    fn report(&self, report: WorkerReport) {
        if self.reports.send(report).is_err() {
            debug!("Report channel closed");
        }
    }
}
