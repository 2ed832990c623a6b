//! # Worker Pool
//!
//! Bookkeeping for the worker processes one supervisor owns: liveness,
//! current job, and whether a worker has been asked to stop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::monitor::{PoolHealth, WorkerHealth};
use super::process::{ReportSender, WorkerExit, WorkerProcess, WorkerSpawner};
use crate::logging::{log_error, log_worker_event};
use crate::worker::{ControlMessage, WorkerReport};

/// The job a worker last reported starting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentJob {
    pub class: String,
    pub operation: String,
    pub job_id: Option<i64>,
}

struct WorkerSlot {
    process: Box<dyn WorkerProcess>,
    last_heartbeat: Instant,
    current_job: Option<CurrentJob>,
    /// Set when a graceful stop was requested
    stopping_since: Option<Instant>,
}

pub struct WorkerPool {
    spawner: Arc<dyn WorkerSpawner>,
    reports: ReportSender,
    workers: BTreeMap<u32, WorkerSlot>,
    /// Killed workers not yet reaped
    terminated: Vec<Box<dyn WorkerProcess>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("pids", &self.pids())
            .field("terminated", &self.terminated.len())
            .finish()
    }
}

impl WorkerPool {
    pub fn new(spawner: Arc<dyn WorkerSpawner>, reports: ReportSender) -> Self {
        Self {
            spawner,
            reports,
            workers: BTreeMap::new(),
            terminated: Vec::new(),
        }
    }

    /// Worker processes still owned, including those asked to stop
    pub fn process_count(&self) -> usize {
        self.workers.len()
    }

    /// Workers not asked to stop
    pub fn running_count(&self) -> usize {
        self.workers
            .values()
            .filter(|slot| slot.stopping_since.is_none())
            .count()
    }

    pub fn pids(&self) -> Vec<u32> {
        self.workers.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty() && self.terminated.is_empty()
    }

    /// Spawn up to `count` workers; spawn failures are logged and end the batch
    pub async fn spawn(&mut self, count: usize, now: Instant) -> usize {
        let mut spawned = 0;
        for _ in 0..count {
            match self.spawner.spawn(self.reports.clone()).await {
                Ok(process) => {
                    let pid = process.pid();
                    log_worker_event("spawn", Some(pid), "started", None);
                    self.workers.insert(
                        pid,
                        WorkerSlot {
                            process,
                            last_heartbeat: now,
                            current_job: None,
                            stopping_since: None,
                        },
                    );
                    spawned += 1;
                }
                Err(e) => {
                    log_error("supervisor", "spawn", &e.to_string(), None);
                    break;
                }
            }
        }
        spawned
    }

    /// Apply a report; anything a worker says counts as a heartbeat
    pub fn record_report(&mut self, pid: u32, report: WorkerReport, now: Instant) {
        let Some(slot) = self.workers.get_mut(&pid) else {
            debug!(pid, ?report, "Report from unknown worker");
            return;
        };
        slot.last_heartbeat = now;
        match report {
            WorkerReport::Heartbeat => {}
            WorkerReport::JobStarted {
                class,
                operation,
                job_id,
            } => {
                debug!(pid, %class, %operation, ?job_id, "Worker started job");
                slot.current_job = Some(CurrentJob {
                    class,
                    operation,
                    job_id,
                });
            }
            WorkerReport::JobFinished { job_id, state } => {
                debug!(pid, ?job_id, %state, "Worker finished job");
                slot.current_job = None;
            }
        }
    }

    /// Kill workers silent for longer than `timeout`. Returns their pids.
    pub fn kill_stale(&mut self, timeout: Duration, now: Instant) -> Vec<u32> {
        let stale: Vec<u32> = self
            .workers
            .iter()
            .filter(|(_, slot)| now.saturating_duration_since(slot.last_heartbeat) > timeout)
            .map(|(pid, _)| *pid)
            .collect();

        for pid in &stale {
            if let Some(slot) = self.workers.get(pid) {
                warn!(
                    pid,
                    silent_secs = now.saturating_duration_since(slot.last_heartbeat).as_secs(),
                    current_job = ?slot.current_job,
                    "💀 SUPERVISOR: Heartbeat timeout, killing worker"
                );
            }
            self.kill(*pid);
        }
        stale
    }

    /// Kill workers whose graceful stop has taken longer than `grace`
    pub fn escalate_stopping(&mut self, grace: Duration, now: Instant) -> Vec<u32> {
        let overdue: Vec<u32> = self
            .workers
            .iter()
            .filter(|(_, slot)| {
                slot.stopping_since
                    .is_some_and(|since| now.saturating_duration_since(since) > grace)
            })
            .map(|(pid, _)| *pid)
            .collect();
        for pid in &overdue {
            warn!(pid, "SUPERVISOR: Graceful stop overdue, killing worker");
            self.kill(*pid);
        }
        overdue
    }

    fn kill(&mut self, pid: u32) {
        if let Some(mut slot) = self.workers.remove(&pid) {
            if let Err(e) = slot.process.kill() {
                log_error("supervisor", "kill", &e.to_string(), Some(&format!("pid={pid}")));
            }
            self.terminated.push(slot.process);
        }
    }

    /// Remove exited workers, logging how each ended
    pub fn reap(&mut self) -> Vec<(u32, WorkerExit)> {
        let mut exited = Vec::new();

        let mut finished = Vec::new();
        for (pid, slot) in self.workers.iter_mut() {
            match slot.process.try_wait() {
                Ok(Some(exit)) => finished.push((*pid, exit)),
                Ok(None) => {}
                Err(e) => warn!(pid, error = %e, "Could not poll worker"),
            }
        }
        for (pid, exit) in finished {
            if let Some(slot) = self.workers.remove(&pid) {
                if slot.stopping_since.is_none() {
                    warn!(pid, %exit, current_job = ?slot.current_job, "Worker exited unexpectedly");
                }
            }
            log_worker_event("exit", Some(pid), &exit.to_string(), None);
            exited.push((pid, exit));
        }

        self.terminated.retain_mut(|process| match process.try_wait() {
            Ok(Some(exit)) => {
                log_worker_event("exit", Some(process.pid()), &exit.to_string(), Some("killed"));
                exited.push((process.pid(), exit));
                false
            }
            Ok(None) => true,
            Err(_) => false,
        });

        exited
    }

    /// Ask up to `count` workers to stop, idle ones first
    pub async fn stop(&mut self, count: usize, now: Instant) -> Vec<u32> {
        let mut candidates: Vec<(bool, u32)> = self
            .workers
            .iter()
            .filter(|(_, slot)| slot.stopping_since.is_none())
            .map(|(pid, slot)| (slot.current_job.is_some(), *pid))
            .collect();
        candidates.sort();
        let pids: Vec<u32> = candidates.into_iter().take(count).map(|(_, pid)| pid).collect();
        for pid in &pids {
            self.request_stop(*pid, now).await;
        }
        pids
    }

    /// Ask every worker to stop
    pub async fn stop_all(&mut self, now: Instant) -> Vec<u32> {
        self.stop(self.workers.len(), now).await
    }

    async fn request_stop(&mut self, pid: u32, now: Instant) {
        let Some(slot) = self.workers.get_mut(&pid) else {
            return;
        };
        slot.stopping_since = Some(now);
        let delivered = slot.process.send(ControlMessage::Shutdown).await;
        match delivered {
            Ok(()) => info!(pid, "SUPERVISOR: Asked worker to stop"),
            Err(e) => {
                debug!(pid, error = %e, "Shutdown not delivered, killing worker");
                self.kill(pid);
            }
        }
    }

    /// Forward a control message to every running worker
    pub async fn broadcast(&mut self, message: ControlMessage) {
        for (pid, slot) in self.workers.iter_mut() {
            if slot.stopping_since.is_some() {
                continue;
            }
            if let Err(e) = slot.process.send(message).await {
                debug!(pid, error = %e, ?message, "Control message not delivered");
            }
        }
    }

    /// Kill everything still owned
    pub fn kill_all(&mut self) {
        for pid in self.pids() {
            self.kill(pid);
        }
    }

    pub fn health(&self, target: usize, now: Instant) -> PoolHealth {
        PoolHealth {
            target,
            workers: self
                .workers
                .iter()
                .map(|(pid, slot)| WorkerHealth {
                    pid: *pid,
                    heartbeat_age: now.saturating_duration_since(slot.last_heartbeat),
                    current_job: slot.current_job.clone(),
                    stopping: slot.stopping_since.is_some(),
                })
                .collect(),
            terminated: self.terminated.len(),
        }
    }
}
