//! # Task Queue CLI
//!
//! `supervise` (the default) runs the worker pool, `worker` is what the
//! supervisor re-executes for each child, `submit` enqueues jobs and
//! `log-status` runs the legacy status logger.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, Notify};
use tracing::{error, info};

use task_queue::config::{ConfigManager, TaskQueueConfig};
use task_queue::lifecycle::{PgJobStore, StatusLogger};
use task_queue::logging::{init_logging, LoggingHandle};
use task_queue::messaging::RabbitMqBroker;
use task_queue::producer::{JobSubmitter, SubmitRequest};
use task_queue::supervisor::{spawn_signal_listener, PoolSupervisor, ProcessSpawner};
use task_queue::worker::run_worker_process;

#[derive(Parser, Debug)]
#[command(name = "task-queue")]
#[command(about = "Worker pool and tools for the task queue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (default: config/task-queue.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// RabbitMQ host; shorthand for a default-vhost broker URL
    #[arg(short, long, global = true)]
    mqhost: Option<String>,

    /// Full broker URL; wins over --mqhost
    #[arg(long, global = true, env = "TASK_QUEUE_BROKER_URL")]
    broker_url: Option<String>,

    /// PostgreSQL URL
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the supervised worker pool
    Supervise {
        #[arg(long)]
        min_workers: Option<usize>,
        #[arg(long)]
        max_workers: Option<usize>,
    },
    /// Run a single worker (started by the supervisor)
    Worker,
    /// Submit jobs
    Submit {
        /// Digital object identifiers
        #[arg(value_name = "ID")]
        ids: Vec<String>,
        /// Service as <class>:<operation>, e.g. video:transcode
        #[arg(short, long)]
        service: String,
        /// R* (rstar) directory
        #[arg(short, long)]
        rstar_dir: Option<PathBuf>,
        /// Input path (directory or file)
        #[arg(short, long)]
        input_path: Option<PathBuf>,
        /// Output path (directory or file prefix)
        #[arg(short, long)]
        output_path: Option<PathBuf>,
        /// Message priority, 0-10
        #[arg(short, long, default_value = "0")]
        priority: u8,
        /// Extra command line arguments for the handler
        #[arg(short, long, default_value = "", allow_hyphen_values = true)]
        extra_args: String,
        /// JSON file whose keys are merged into each job
        #[arg(short, long)]
        json_config: Option<PathBuf>,
    },
    /// Fold lifecycle events into the per-collection status log
    LogStatus,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<TaskQueueConfig> {
        let manager = ConfigManager::load(self.config.as_deref())
            .context("loading configuration")?;
        let mut config = manager.config().clone();
        if let Some(host) = &self.mqhost {
            config.broker.url = format!("amqp://{host}:5672/%2f");
        }
        if let Some(url) = &self.broker_url {
            config.broker.url = url.clone();
        }
        if let Some(url) = &self.database_url {
            config.database.url = url.clone();
        }
        Ok(config)
    }

    /// Global options handed to re-executed workers
    fn worker_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = &self.config {
            args.push("--config".to_string());
            args.push(path.display().to_string());
        }
        if let Some(host) = &self.mqhost {
            args.push("--mqhost".to_string());
            args.push(host.clone());
        }
        if let Some(url) = &self.broker_url {
            args.push("--broker-url".to_string());
            args.push(url.clone());
        }
        if let Some(url) = &self.database_url {
            args.push("--database-url".to_string());
            args.push(url.clone());
        }
        args
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = cli.load_config()?;

    match &cli.command {
        Some(Commands::Worker) => {
            let logging = init_logging(&config.logging, "worker")?;
            // One job at a time: a single-threaded runtime is enough
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let result = runtime.block_on(run_worker_process(config, logging));
            // stdin is read on a blocking thread that cannot be cancelled
            runtime.shutdown_timeout(Duration::from_secs(1));
            result?;
            Ok(())
        }
        Some(Commands::Supervise {
            min_workers,
            max_workers,
        }) => {
            if let Some(min) = min_workers {
                config.pool.min_workers = *min;
            }
            if let Some(max) = max_workers {
                config.pool.max_workers = *max;
            }
            config.validate()?;
            let logging = init_logging(&config.logging, "supervisor")?;
            run_async(supervise(config, cli.worker_args(), logging))
        }
        None => {
            let logging = init_logging(&config.logging, "supervisor")?;
            run_async(supervise(config, cli.worker_args(), logging))
        }
        Some(Commands::Submit {
            ids,
            service,
            rstar_dir,
            input_path,
            output_path,
            priority,
            extra_args,
            json_config,
        }) => {
            init_logging(&config.logging, "submit")?;
            let json_config = match json_config {
                Some(path) => {
                    let text = std::fs::read_to_string(path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    match serde_json::from_str(&text)? {
                        serde_json::Value::Object(map) => Some(map),
                        _ => bail!("{} must contain a JSON object", path.display()),
                    }
                }
                None => None,
            };
            let request = SubmitRequest {
                service: service.clone(),
                identifiers: ids.clone(),
                rstar_dir: rstar_dir.clone(),
                input_path: absolute(input_path.as_ref())?,
                output_path: absolute(output_path.as_ref())?,
                extra_args: extra_args.clone(),
                priority: *priority,
                json_config,
                user_id: login_name(),
                cmd_line: std::env::args().collect::<Vec<_>>().join(" "),
            };
            run_async(submit(config, request))
        }
        Some(Commands::LogStatus) => {
            init_logging(&config.logging, "log-status")?;
            run_async(log_status(config))
        }
    }
}

fn run_async<F>(future: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = anyhow::Result<()>>,
{
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(future)
}

async fn supervise(
    config: TaskQueueConfig,
    worker_args: Vec<String>,
    logging: LoggingHandle,
) -> anyhow::Result<()> {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    spawn_signal_listener(command_tx).context("installing signal handlers")?;

    let spawner = Arc::new(ProcessSpawner::current_exe(worker_args)?);
    let supervisor = PoolSupervisor::new(config.pool, spawner, command_rx, logging);
    supervisor.run().await?;
    Ok(())
}

async fn submit(config: TaskQueueConfig, request: SubmitRequest) -> anyhow::Result<()> {
    request.validate()?;
    let broker = RabbitMqBroker::connect(&config.broker).await?;
    let store = Arc::new(PgJobStore::connect(&config.database).await?);
    let submitter = JobSubmitter::new(
        store,
        Arc::new(broker.publisher().await?),
        Arc::new(broker.producer().await?),
    );

    let receipt = submitter.submit(&request).await?;
    info!(
        batch_id = receipt.batch_id,
        jobs = receipt.job_ids.len(),
        "✅ SUBMIT: Batch enqueued"
    );
    broker.close().await?;
    Ok(())
}

async fn log_status(config: TaskQueueConfig) -> anyhow::Result<()> {
    let broker = RabbitMqBroker::connect(&config.broker).await?;
    let store = Arc::new(PgJobStore::connect(&config.database).await?);
    let logger = StatusLogger::new(Arc::new(broker.log_reader().await?), store);

    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.notify_one();
        }
    });

    let result = logger.run(shutdown).await;
    if let Err(e) = &result {
        error!(error = %e, "Status logger stopped");
    }
    broker.close().await?;
    result?;
    Ok(())
}

fn absolute(path: Option<&PathBuf>) -> anyhow::Result<Option<PathBuf>> {
    path.map(|p| {
        std::fs::canonicalize(p).with_context(|| format!("File not found: '{}'", p.display()))
    })
    .transpose()
}

fn login_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
