//! Scripted worker processes for supervisor tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use task_queue::supervisor::{ReportSender, WorkerExit, WorkerProcess, WorkerSpawner};
use task_queue::worker::{ControlMessage, WorkerReport};

#[derive(Debug, Default)]
struct FakeState {
    exit: Mutex<Option<WorkerExit>>,
    killed: AtomicBool,
    received: Mutex<Vec<ControlMessage>>,
}

/// Test-side handle on one fake worker
#[derive(Clone)]
pub struct FakeHandle {
    pub pid: u32,
    state: Arc<FakeState>,
    reports: ReportSender,
}

impl FakeHandle {
    pub fn report(&self, report: WorkerReport) {
        let _ = self.reports.send((self.pid, report));
    }

    pub fn heartbeat(&self) {
        self.report(WorkerReport::Heartbeat);
    }

    /// Make the process exit as if it crashed
    pub fn crash(&self) {
        *self.state.exit.lock() = Some(WorkerExit::Code(1));
    }

    pub fn is_killed(&self) -> bool {
        self.state.killed.load(Ordering::SeqCst)
    }

    pub fn has_exited(&self) -> bool {
        self.state.exit.lock().is_some()
    }

    pub fn received(&self) -> Vec<ControlMessage> {
        self.state.received.lock().clone()
    }
}

struct FakeProcess {
    pid: u32,
    state: Arc<FakeState>,
    exit_on_shutdown: bool,
}

#[async_trait]
impl WorkerProcess for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn send(&mut self, message: ControlMessage) -> std::io::Result<()> {
        if self.state.exit.lock().is_some() {
            return Err(std::io::ErrorKind::BrokenPipe.into());
        }
        self.state.received.lock().push(message);
        if message == ControlMessage::Shutdown && self.exit_on_shutdown {
            *self.state.exit.lock() = Some(WorkerExit::Code(0));
        }
        Ok(())
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.state.killed.store(true, Ordering::SeqCst);
        self.state.exit.lock().get_or_insert(WorkerExit::Signal(9));
        Ok(())
    }

    fn try_wait(&mut self) -> std::io::Result<Option<WorkerExit>> {
        Ok(*self.state.exit.lock())
    }
}

/// Hands out fake processes with increasing pids
pub struct FakeSpawner {
    next_pid: AtomicU32,
    handles: Mutex<Vec<FakeHandle>>,
    exit_on_shutdown: bool,
}

impl FakeSpawner {
    /// Workers that exit as soon as they are asked to stop
    pub fn new() -> Arc<Self> {
        Self::with_shutdown_behavior(true)
    }

    /// Workers that ignore shutdown requests until killed
    pub fn stubborn() -> Arc<Self> {
        Self::with_shutdown_behavior(false)
    }

    fn with_shutdown_behavior(exit_on_shutdown: bool) -> Arc<Self> {
        Arc::new(Self {
            next_pid: AtomicU32::new(1000),
            handles: Mutex::new(Vec::new()),
            exit_on_shutdown,
        })
    }

    pub fn handles(&self) -> Vec<FakeHandle> {
        self.handles.lock().clone()
    }

    pub fn spawned(&self) -> usize {
        self.handles.lock().len()
    }

    /// Handles whose process has not exited
    pub fn alive(&self) -> Vec<FakeHandle> {
        self.handles()
            .into_iter()
            .filter(|handle| !handle.has_exited())
            .collect()
    }
}

#[async_trait]
impl WorkerSpawner for FakeSpawner {
    async fn spawn(&self, reports: ReportSender) -> std::io::Result<Box<dyn WorkerProcess>> {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let state = Arc::new(FakeState::default());
        self.handles.lock().push(FakeHandle {
            pid,
            state: state.clone(),
            reports,
        });
        Ok(Box::new(FakeProcess {
            pid,
            state,
            exit_on_shutdown: self.exit_on_shutdown,
        }))
    }
}
