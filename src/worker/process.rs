//! Worker process entry point: wires the production broker and store to the
//! parent/child channel on stdin/stdout.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::job_worker::{local_hostname, JobWorker};
use super::lifecycle::{WorkerRuntime, WorkerStats};
use super::protocol::{decode_line, encode_line, ControlMessage, WorkerReport};
use crate::config::TaskQueueConfig;
use crate::error::Result;
use crate::lifecycle::{LifecycleTracker, PgJobStore};
use crate::logging::{log_worker_event, LoggingHandle};
use crate::messaging::{JobQueue, RabbitMqBroker};
use crate::registry::HandlerRegistry;

/// Run one worker until shutdown or a broker fault
pub async fn run_worker_process(config: TaskQueueConfig, logging: LoggingHandle) -> Result<WorkerStats> {
    let pid = std::process::id();
    log_worker_event("start", Some(pid), "connecting", None);

    let broker = RabbitMqBroker::connect(&config.broker).await?;
    let queue: Arc<dyn JobQueue> = Arc::new(broker.job_queue().await?);
    let publisher = Arc::new(broker.publisher().await?);
    let store = Arc::new(PgJobStore::connect(&config.database).await?);

    let tracker = LifecycleTracker::new(store, publisher);
    let registry = Arc::new(HandlerRegistry::with_builtin_handlers(config.handlers.clone()));
    let worker = JobWorker::new(registry, tracker, local_hostname(), logging);

    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    tokio::spawn(write_reports(report_rx));
    tokio::spawn(read_control(control_tx.clone()));
    forward_signals(control_tx)?;

    let runtime = WorkerRuntime::new(
        worker,
        queue,
        report_tx,
        control_rx,
        config.pool.heartbeat_interval(),
    );
    let result = runtime.run().await;

    if let Err(e) = broker.close().await {
        debug!(error = %e, "Broker close failed");
    }
    match &result {
        Ok(stats) => log_worker_event(
            "exit",
            Some(pid),
            "stopped",
            Some(&format!("processed={}", stats.processed)),
        ),
        Err(e) => log_worker_event("exit", Some(pid), "failed", Some(&e.to_string())),
    }
    result
}

/// Reports to stdout, one line each
async fn write_reports(mut reports: mpsc::UnboundedReceiver<WorkerReport>) {
    let mut stdout = tokio::io::stdout();
    while let Some(report) = reports.recv().await {
        let line = match encode_line(&report) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Unencodable report");
                continue;
            }
        };
        if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
            debug!("Supervisor channel closed");
            break;
        }
    }
}

/// Control lines from stdin; EOF becomes a shutdown
async fn read_control(control: mpsc::UnboundedSender<ControlMessage>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match decode_line::<ControlMessage>(&line) {
                Ok(message) => {
                    if control.send(message).is_err() {
                        return;
                    }
                }
                Err(e) => warn!(error = %e, line = %line, "Unknown control message"),
            },
            Ok(None) | Err(_) => {
                info!("Supervisor channel closed, shutting down");
                let _ = control.send(ControlMessage::Shutdown);
                return;
            }
        }
    }
}

/// SIGTERM and SIGINT finish the current job and exit; SIGHUP reopens logs
fn forward_signals(control: mpsc::UnboundedSender<ControlMessage>) -> std::io::Result<()> {
    let mut term = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut hangup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                _ = term.recv() => ControlMessage::Shutdown,
                _ = interrupt.recv() => ControlMessage::Shutdown,
                _ = hangup.recv() => ControlMessage::ReopenLogs,
            };
            if control.send(message).is_err() {
                break;
            }
        }
    });
    Ok(())
}
