//! # Structured Logging Module
//!
//! Environment-aware structured logging to stderr and, optionally, an append-only
//! log file that can be reopened in place after rotation.
//!
//! Worker processes use stdout for the supervisor channel, so nothing here ever
//! writes to stdout.

use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;
use crate::constants::ENVIRONMENT_VAR;

/// Log file handle shared by the subscriber and whoever handles reopen requests
#[derive(Debug, Clone)]
pub struct ReopenableFile {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl ReopenableFile {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = Self::open_append(&path)?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Reopen the file by path, picking up a rotated replacement
    pub fn reopen(&self) -> io::Result<()> {
        let fresh = Self::open_append(&self.path)?;
        let mut guard = self.file.lock();
        let _ = guard.flush();
        *guard = fresh;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_append(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }
}

/// Writer handed out per log event
pub struct ReopenableWriter {
    file: Arc<Mutex<File>>,
}

impl Write for ReopenableWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for ReopenableFile {
    type Writer = ReopenableWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ReopenableWriter {
            file: Arc::clone(&self.file),
        }
    }
}

/// Handle returned by [`init_logging`]; owns the reopenable sink if one is configured
#[derive(Debug, Clone, Default)]
pub struct LoggingHandle {
    file: Option<ReopenableFile>,
}

impl LoggingHandle {
    /// Reopen the log file in place; a no-op when logging only to stderr
    pub fn reopen(&self) -> io::Result<()> {
        match &self.file {
            Some(file) => {
                file.reopen()?;
                tracing::info!(log_file = %file.path().display(), "🔄 LOGGING: Log file reopened");
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.file.as_ref().map(ReopenableFile::path)
    }
}

/// Initialize structured logging with environment-specific configuration.
///
/// `RUST_LOG` wins over the configured level, which wins over the
/// environment default. Initializing twice keeps the first subscriber.
pub fn init_logging(config: &LoggingConfig, component: &str) -> io::Result<LoggingHandle> {
    let environment = get_environment();
    let level = config
        .level
        .clone()
        .unwrap_or_else(|| get_log_level(&environment));

    let file = match &config.file {
        Some(path) => Some(ReopenableFile::open(path)?),
        None => None,
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_level(true);
    if config.json {
        layers.push(stderr_layer.json().with_filter(build_filter(&level)).boxed());
    } else {
        layers.push(stderr_layer.with_filter(build_filter(&level)).boxed());
    }

    if let Some(file) = &file {
        let file_layer = fmt::layer()
            .with_writer(file.clone())
            .with_target(true)
            .with_level(true)
            .with_ansi(false);
        if config.json {
            layers.push(file_layer.json().with_filter(build_filter(&level)).boxed());
        } else {
            layers.push(file_layer.with_filter(build_filter(&level)).boxed());
        }
    }

    if tracing_subscriber::registry().with(layers).try_init().is_err() {
        tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
    }

    tracing::info!(
        pid = std::process::id(),
        component = %component,
        environment = %environment,
        log_file = ?config.file,
        "🔧 LOGGING: Initialized"
    );

    Ok(LoggingHandle { file })
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Get current environment from environment variables
pub fn get_environment() -> String {
    std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        "test" => "debug".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for job lifecycle operations
pub fn log_job_operation(
    operation: &str,
    job_id: Option<i64>,
    class: Option<&str>,
    job_operation: Option<&str>,
    state: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        job_id = job_id,
        class = class,
        job_operation = job_operation,
        state = %state,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 JOB_OPERATION"
    );
}

/// Log structured data for worker process events
pub fn log_worker_event(event: &str, pid: Option<u32>, status: &str, details: Option<&str>) {
    tracing::info!(
        event = %event,
        pid = pid,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "👷 WORKER_EVENT"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
