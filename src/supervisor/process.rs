//! Worker processes as the supervisor sees them.
//!
//! [`WorkerSpawner`] produces [`WorkerProcess`]es. The production spawner
//! re-executes the current binary with the `worker` subcommand, writes
//! control lines to its stdin and forwards the reports it prints on stdout.
//!
//! Each worker leads its own process group. Killing a worker signals the
//! whole group, so the external commands it was running die with it.

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::constants::WORKER_SUBCOMMAND;
use crate::worker::{decode_line, encode_line, ControlMessage, WorkerReport};

/// Reports tagged with the reporting worker's pid
pub type ReportSender = mpsc::UnboundedSender<(u32, WorkerReport)>;

/// How a worker process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Code(i32),
    Signal(i32),
}

impl WorkerExit {
    pub fn from_status(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Code(code),
            (None, Some(signal)) => Self::Signal(signal),
            (None, None) => Self::Code(-1),
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Code(0))
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit status {code}"),
            Self::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}

#[async_trait]
pub trait WorkerProcess: Send {
    fn pid(&self) -> u32;

    /// Deliver a control message; fails once the worker's stdin is closed
    async fn send(&mut self, message: ControlMessage) -> std::io::Result<()>;

    /// Kill without waiting for the in-flight job
    fn kill(&mut self) -> std::io::Result<()>;

    /// Exit status if the process has ended, without blocking
    fn try_wait(&mut self) -> std::io::Result<Option<WorkerExit>>;
}

#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self, reports: ReportSender) -> std::io::Result<Box<dyn WorkerProcess>>;
}

/// Spawns `<exe> [args...] worker`
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    exe: PathBuf,
    args: Vec<String>,
}

impl ProcessSpawner {
    pub fn new(exe: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            exe: exe.into(),
            args,
        }
    }

    /// Re-execute the running binary, passing `args` before the subcommand
    pub fn current_exe(args: Vec<String>) -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, args))
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    async fn spawn(&self, reports: ReportSender) -> std::io::Result<Box<dyn WorkerProcess>> {
        let mut child = Command::new(&self.exe)
            .args(&self.args)
            .arg(WORKER_SUBCOMMAND)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()?;

        let pid = child
            .id()
            .ok_or_else(|| std::io::Error::other("worker exited before reporting a pid"))?;
        let stdin = child.stdin.take();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_reports(pid, stdout, reports));
        }

        Ok(Box::new(ChildWorker { pid, child, stdin }))
    }
}

async fn forward_reports(pid: u32, stdout: tokio::process::ChildStdout, reports: ReportSender) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match decode_line::<WorkerReport>(&line) {
            Ok(report) => {
                if reports.send((pid, report)).is_err() {
                    break;
                }
            }
            Err(e) => warn!(pid, error = %e, line = %line, "Unreadable worker report"),
        }
    }
    debug!(pid, "Worker report stream closed");
}

struct ChildWorker {
    pid: u32,
    child: Child,
    stdin: Option<ChildStdin>,
}

#[async_trait]
impl WorkerProcess for ChildWorker {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn send(&mut self, message: ControlMessage) -> std::io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::BrokenPipe))?;
        let line = encode_line(&message)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.stdin = None;
        // An unreaped leader keeps the group id from being reused
        if self.child.id().is_some() {
            if let Err(e) = kill_process_group(self.pid) {
                debug!(pid = self.pid, error = %e, "Process group already gone");
            }
        }
        self.child.start_kill()
    }

    fn try_wait(&mut self) -> std::io::Result<Option<WorkerExit>> {
        Ok(self.child.try_wait()?.map(WorkerExit::from_status))
    }
}

/// SIGKILL every process in the group led by `pgid`
fn kill_process_group(pgid: u32) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pgid)
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    // SAFETY: killpg takes plain integers and touches no memory
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_description() {
        let clean = WorkerExit::from_status(ExitStatus::from_raw(0));
        assert!(clean.is_clean());
        assert_eq!(clean.to_string(), "exit status 0");

        let killed = WorkerExit::from_status(ExitStatus::from_raw(9));
        assert_eq!(killed, WorkerExit::Signal(9));
        assert_eq!(killed.to_string(), "signal 9");

        let failed = WorkerExit::from_status(ExitStatus::from_raw(1 << 8));
        assert_eq!(failed, WorkerExit::Code(1));
    }

    #[tokio::test]
    async fn test_spawned_process_reports_and_exits() {
        // A stand-in binary that prints one heartbeat and exits
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "#!/bin/sh\necho '{\"type\":\"heartbeat\"}'\n");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut worker = ProcessSpawner::new(&script, vec![]).spawn(tx).await.unwrap();
        let (pid, report) = rx.recv().await.unwrap();
        assert_eq!(pid, worker.pid());
        assert_eq!(report, WorkerReport::Heartbeat);

        let exit = loop {
            if let Some(exit) = worker.try_wait().unwrap() {
                break exit;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        };
        assert!(exit.is_clean());
    }

    fn write_script(dir: &std::path::Path, body: &str) -> PathBuf {
        let script = dir.join("fake-worker");
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(
            &script,
            std::os::unix::fs::PermissionsExt::from_mode(0o755),
        )
        .unwrap();
        script
    }

    /// Gone, or a zombie waiting for init
    fn is_dead(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
            Err(_) => true,
        }
    }

    #[tokio::test]
    async fn test_kill_takes_running_commands_down() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("command.pid");
        let script = write_script(
            dir.path(),
            &format!(
                "#!/bin/sh\nsleep 97 &\necho $! > {}\necho '{{\"type\":\"heartbeat\"}}'\nwait\n",
                pid_file.display()
            ),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut worker = ProcessSpawner::new(&script, vec![]).spawn(tx).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().1, WorkerReport::Heartbeat);
        let command_pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        assert!(!is_dead(&command_pid));

        worker.kill().unwrap();
        let exit = loop {
            if let Some(exit) = worker.try_wait().unwrap() {
                break exit;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        };
        assert_eq!(exit, WorkerExit::Signal(9));

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !is_dead(&command_pid) && std::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(is_dead(&command_pid), "command {command_pid} outlived its worker");
    }
}
