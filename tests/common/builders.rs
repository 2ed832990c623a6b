//! Wiring for in-process worker tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use task_queue::config::HandlerConfig;
use task_queue::lifecycle::{InMemoryJobStore, LifecycleTracker};
use task_queue::logging::LoggingHandle;
use task_queue::messaging::InMemoryBroker;
use task_queue::registry::HandlerRegistry;
use task_queue::worker::{ControlMessage, JobWorker, WorkerReport, WorkerRuntime, WorkerStats};
use task_queue::Job;

pub const QUEUE: &str = "task_queue";

/// Handler settings that never leave the machine
pub fn local_handler_config() -> HandlerConfig {
    HandlerConfig {
        ping_command: "echo pong from".to_string(),
        ping_target: "localhost".to_string(),
        ..HandlerConfig::default()
    }
}

/// A worker consuming [`QUEUE`] on a background task
pub struct WorkerHarness {
    pub control: mpsc::UnboundedSender<ControlMessage>,
    pub reports: mpsc::UnboundedReceiver<WorkerReport>,
    pub handle: JoinHandle<task_queue::Result<WorkerStats>>,
}

impl WorkerHarness {
    pub fn start(broker: &InMemoryBroker, store: Arc<InMemoryJobStore>, registry: HandlerRegistry) -> Self {
        let tracker = LifecycleTracker::new(store, Arc::new(broker.clone()));
        let worker = JobWorker::new(
            Arc::new(registry),
            tracker,
            "test-host",
            LoggingHandle::default(),
        );
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let runtime = WorkerRuntime::new(
            worker,
            Arc::new(broker.consumer(QUEUE)),
            report_tx,
            control_rx,
            Duration::from_millis(50),
        );
        Self {
            control: control_tx,
            reports: report_rx,
            handle: tokio::spawn(runtime.run()),
        }
    }

    /// Wait for the next finished job
    pub async fn next_finished(&mut self) -> WorkerReport {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match self.reports.recv().await {
                    Some(report @ WorkerReport::JobFinished { .. }) => return report,
                    Some(_) => continue,
                    None => panic!("worker stopped before finishing a job"),
                }
            }
        })
        .await
        .expect("job did not finish in time")
    }

    /// Wait for the next started job
    pub async fn next_started(&mut self) -> WorkerReport {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match self.reports.recv().await {
                    Some(report @ WorkerReport::JobStarted { .. }) => return report,
                    Some(_) => continue,
                    None => panic!("worker stopped before starting a job"),
                }
            }
        })
        .await
        .expect("job did not start in time")
    }

    pub async fn stop(self) -> task_queue::Result<WorkerStats> {
        let _ = self.control.send(ControlMessage::Shutdown);
        self.handle.await.expect("worker task panicked")
    }
}

/// Put a job on the work queue
pub fn enqueue(broker: &InMemoryBroker, job: &Job) {
    broker.push(QUEUE, job.to_json().unwrap(), job.priority);
}
