//! Sequential shell command execution with combined output capture.

use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Result of running a command sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    /// Combined stdout/stderr of every command that ran, in order
    pub output: String,
}

impl CommandOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Expands a script name into `<bin_dir>/<script> -q -r <rstar_dir> <ids...>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RstarInvocation {
    pub bin_dir: PathBuf,
    pub rstar_dir: String,
    pub identifiers: Vec<String>,
}

impl RstarInvocation {
    pub fn new(bin_dir: impl Into<PathBuf>, rstar_dir: impl Into<String>, identifiers: Vec<String>) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            rstar_dir: rstar_dir.into(),
            identifiers,
        }
    }

    pub fn command_for(&self, script: &str) -> String {
        format!(
            "{}/{} -q -r {} {}",
            self.bin_dir.display(),
            script,
            self.rstar_dir,
            self.identifiers.join(" ")
        )
    }
}

/// Runs shell commands one at a time through `sh -c`, stopping at the first failure.
///
/// Children are killed if the future driving them is dropped. A worker that
/// is itself killed drops nothing; the supervisor reaches its commands by
/// signalling the worker's whole process group.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    env: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    rstar: Option<RstarInvocation>,
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable to the environment overlay
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Treat every command as an rstar script name
    pub fn with_rstar(mut self, invocation: RstarInvocation) -> Self {
        self.rstar = Some(invocation);
        self
    }

    /// Command line actually handed to the shell
    pub fn expand(&self, command: &str) -> String {
        match &self.rstar {
            Some(invocation) => invocation.command_for(command),
            None => command.to_string(),
        }
    }

    /// Run `commands` in order. An empty sequence succeeds with no output.
    ///
    /// Command lines are expanded up front, so the returned future owns them
    /// and stays `Send` whatever iterator the caller passes.
    pub fn run<I, S>(&self, commands: I) -> impl Future<Output = CommandOutcome> + Send + '_
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let lines: Vec<String> = commands
            .into_iter()
            .map(|command| self.expand(command.as_ref()))
            .collect();
        self.run_lines(lines)
    }

    async fn run_lines(&self, lines: Vec<String>) -> CommandOutcome {
        let mut output = String::new();
        let mut success = true;

        for command_line in lines {
            debug!(command = %command_line, "Running command");

            match self.spawn(&command_line).await {
                Ok(result) => {
                    let text = String::from_utf8_lossy(&result.stdout);
                    debug!(command = %command_line, output = %text, "Command output");
                    output.push_str(&text);
                    success = result.status.success();
                    if !success {
                        warn!(
                            command = %command_line,
                            exit_code = ?result.status.code(),
                            "Command failed"
                        );
                    }
                }
                Err(e) => {
                    warn!(command = %command_line, error = %e, "Command could not be launched");
                    output.push_str(&format!("failed to launch `{command_line}`: {e}\n"));
                    success = false;
                }
            }

            if !success {
                break;
            }
        }

        CommandOutcome { success, output }
    }

    async fn spawn(&self, command_line: &str) -> std::io::Result<std::process::Output> {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(format!("exec 2>&1\n{command_line}"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        for (key, value) in &self.env {
            command.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        command.output().await
    }
}
