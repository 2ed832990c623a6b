//! Pool health snapshots, logged once per tick.

use std::time::Duration;

use serde::Serialize;
use tracing::info;

use super::pool::CurrentJob;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHealth {
    pub pid: u32,
    pub heartbeat_age: Duration,
    pub current_job: Option<CurrentJob>,
    pub stopping: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolHealth {
    pub target: usize,
    pub workers: Vec<WorkerHealth>,
    /// Killed but not yet reaped
    pub terminated: usize,
}

#[derive(Serialize)]
struct WorkerLine {
    pid: u32,
    heartbeat_age_secs: u64,
    job: Option<String>,
    stopping: bool,
}

impl PoolHealth {
    pub fn live_pids(&self) -> Vec<u32> {
        self.workers.iter().map(|w| w.pid).collect()
    }

    pub fn busy_count(&self) -> usize {
        self.workers.iter().filter(|w| w.current_job.is_some()).count()
    }

    /// Emit the snapshot as one structured log line
    pub fn log(&self) {
        let workers: Vec<WorkerLine> = self
            .workers
            .iter()
            .map(|w| WorkerLine {
                pid: w.pid,
                heartbeat_age_secs: w.heartbeat_age.as_secs(),
                job: w.current_job.as_ref().map(|job| match job.job_id {
                    Some(id) => format!("{}:{}#{}", job.class, job.operation, id),
                    None => format!("{}:{}", job.class, job.operation),
                }),
                stopping: w.stopping,
            })
            .collect();
        let detail = serde_json::to_string(&workers).unwrap_or_default();

        info!(
            target_workers = self.target,
            live = self.workers.len(),
            busy = self.busy_count(),
            terminated = self.terminated,
            workers = %detail,
            "🏥 SUPERVISOR: Pool health"
        );
    }
}
