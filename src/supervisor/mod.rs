//! # Pool Supervisor
//!
//! Owns a bounded set of worker processes. Every tick it kills workers whose
//! heartbeat is overdue, reaps exited ones and respawns toward the target.
//! Operator commands arrive on a [`ControlCommand`] channel fed by OS signals.
//!
//! ## Key Components
//!
//! - [`PoolSupervisor`] - tick loop and command handling
//! - [`pool`] - worker bookkeeping
//! - [`scaling`] - target size and reconciliation decisions
//! - [`monitor`] - health snapshots
//! - [`process`] - spawning and talking to worker processes
//! - [`control`] - commands and the signal listener

pub mod control;
pub mod monitor;
pub mod pool;
pub mod process;
pub mod scaling;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use crate::config::PoolConfig;
use crate::error::Result;
use crate::logging::{log_error, LoggingHandle};
use crate::worker::{ControlMessage, WorkerReport};

pub use control::{spawn_signal_listener, ControlCommand};
pub use monitor::{PoolHealth, WorkerHealth};
pub use pool::{CurrentJob, WorkerPool};
pub use process::{ProcessSpawner, ReportSender, WorkerExit, WorkerProcess, WorkerSpawner};
pub use scaling::{PoolTarget, ScalingAction};

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub killed: Vec<u32>,
    pub exited: Vec<(u32, WorkerExit)>,
    pub spawned: usize,
    pub stopped: Vec<u32>,
}

pub struct PoolSupervisor {
    config: PoolConfig,
    pool: WorkerPool,
    target: PoolTarget,
    reports: mpsc::UnboundedReceiver<(u32, WorkerReport)>,
    commands: mpsc::UnboundedReceiver<ControlCommand>,
    logging: LoggingHandle,
}

impl std::fmt::Debug for PoolSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolSupervisor")
            .field("target", &self.target)
            .field("pool", &self.pool)
            .finish()
    }
}

impl PoolSupervisor {
    pub fn new(
        config: PoolConfig,
        spawner: Arc<dyn WorkerSpawner>,
        commands: mpsc::UnboundedReceiver<ControlCommand>,
        logging: LoggingHandle,
    ) -> Self {
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        info!(
            min = config.min_workers,
            max = config.max_workers,
            target = config.initial_target(),
            "🏗️ SUPERVISOR: Creating worker pool"
        );
        Self {
            target: PoolTarget::from_config(&config),
            pool: WorkerPool::new(spawner, report_tx),
            config,
            reports: report_rx,
            commands,
            logging,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn target(&self) -> &PoolTarget {
        &self.target
    }

    /// Run until a shutdown command (or the command channel closes)
    #[instrument(skip(self))]
    pub async fn run(mut self) -> Result<()> {
        info!("🚀 SUPERVISOR: Starting");
        self.tick_at(Instant::now()).await;

        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                Some((pid, report)) = self.reports.recv() => {
                    self.pool.record_report(pid, report, Instant::now());
                }
                command = self.commands.recv() => {
                    let command = command.unwrap_or(ControlCommand::Shutdown);
                    if command == ControlCommand::Shutdown {
                        break;
                    }
                    self.handle_command(command).await;
                }
                _ = ticker.tick() => {
                    self.tick_at(Instant::now()).await;
                }
            }
        }

        self.shutdown().await
    }

    /// Apply every report received so far
    pub fn drain_reports(&mut self, now: Instant) {
        while let Ok((pid, report)) = self.reports.try_recv() {
            self.pool.record_report(pid, report, now);
        }
    }

    /// One reconciliation pass as of `now`
    pub async fn tick_at(&mut self, now: Instant) -> TickSummary {
        self.drain_reports(now);
        let mut summary = TickSummary::default();

        if let Some(timeout) = self.config.heartbeat_timeout() {
            summary.killed = self.pool.kill_stale(timeout, now);
        }
        if let Some(grace) = self.config.shutdown_grace() {
            summary.killed.extend(self.pool.escalate_stopping(grace, now));
        }
        summary.exited = self.pool.reap();

        match self
            .target
            .evaluate(self.pool.process_count(), self.pool.running_count())
        {
            ScalingAction::ScaleUp { count } => {
                info!(count, "🔼 SUPERVISOR: Spawning workers");
                summary.spawned = self.pool.spawn(count, now).await;
            }
            ScalingAction::ScaleDown { count } => {
                info!(count, "🔽 SUPERVISOR: Stopping workers");
                summary.stopped = self.pool.stop(count, now).await;
            }
            ScalingAction::NoChange => {}
        }

        self.pool.health(self.target.target(), now).log();
        debug!(?summary, "Tick complete");
        summary
    }

    /// Apply an operator command other than shutdown
    pub async fn handle_command(&mut self, command: ControlCommand) {
        info!(?command, "🎛️ SUPERVISOR: Control command");
        let now = Instant::now();
        match command {
            ControlCommand::AddWorker => {
                if self.target.add_worker() && self.pool.process_count() < self.target.max() {
                    self.pool.spawn(1, now).await;
                }
            }
            ControlCommand::ScaleDown => {
                self.target.scale_down();
                self.pool.stop_all(now).await;
            }
            ControlCommand::ReopenLogs => {
                if let Err(e) = self.logging.reopen() {
                    log_error("supervisor", "reopen_logs", &e.to_string(), None);
                }
                self.pool.broadcast(ControlMessage::ReopenLogs).await;
            }
            ControlCommand::Shutdown => {}
        }
    }

    /// Stop every worker and wait for them to finish their jobs. Workers
    /// still running after the grace period (if one is set) are killed, as are
    /// workers that stop heartbeating.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("🛑 SUPERVISOR: Shutting down worker pool");
        let started = Instant::now();
        self.pool.stop_all(started).await;

        let grace = self.config.shutdown_grace();
        let mut killed_all = false;
        loop {
            let now = Instant::now();
            self.drain_reports(now);
            if let Some(timeout) = self.config.heartbeat_timeout() {
                self.pool.kill_stale(timeout, now);
            }
            self.pool.reap();
            if self.pool.is_empty() {
                break;
            }
            if !killed_all && grace.is_some_and(|grace| started.elapsed() > grace) {
                info!(remaining = ?self.pool.pids(), "SUPERVISOR: Grace period over, killing workers");
                self.pool.kill_all();
                killed_all = true;
            }
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }

        info!("✅ SUPERVISOR: All workers stopped");
        Ok(())
    }
}
