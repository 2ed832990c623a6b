//! Job persistence interface and the in-memory implementation used by tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use super::collection::{CollectionKey, CollectionType};
use crate::models::{Batch, Job, JobTimestamp};
use crate::state_machine::JobState;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence of job records
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Write a new job row, returning its `job_id`
    async fn insert(&self, job: &Job) -> StoreResult<i64>;

    /// Overwrite the lifecycle columns of an existing row; returns rows affected
    async fn update(&self, job_id: i64, job: &Job) -> StoreResult<u64>;

    /// Record a producer invocation, returning its `batch_id`
    async fn create_batch(&self, batch: &Batch) -> StoreResult<i64>;

    fn store_name(&self) -> &'static str;
}

/// One `task_queue_log` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLogEntry {
    pub wip_id: String,
    pub state: JobState,
    pub user_id: String,
    pub worker_host: Option<String>,
    pub started: Option<JobTimestamp>,
    pub completed: Option<JobTimestamp>,
}

impl TaskLogEntry {
    /// Entry for the job's first identifier; `None` when it has none
    pub fn from_job(job: &Job) -> Option<Self> {
        Some(Self {
            wip_id: job.primary_identifier()?.to_string(),
            state: job.state,
            user_id: job.user_id.clone().unwrap_or_else(|| "unknown".to_string()),
            worker_host: job.worker_host.clone(),
            started: job.started,
            completed: job.completed,
        })
    }
}

/// Persistence for the legacy per-collection status log
#[async_trait]
pub trait TaskLogStore: Send + Sync {
    /// Existing collection id, or a new row created with `kind`
    async fn find_or_create_collection(
        &self,
        key: &CollectionKey,
        kind: CollectionType,
    ) -> StoreResult<i64>;

    /// Insert or update the row for `(collection_id, entry.wip_id)`
    async fn upsert_task_log(&self, collection_id: i64, entry: &TaskLogEntry) -> StoreResult<()>;
}

/// Snapshot of a job row as the in-memory store holds it
#[derive(Debug, Clone, PartialEq)]
pub struct StoredJob {
    pub job_id: i64,
    pub batch_id: Option<i64>,
    pub state: JobState,
    pub output: Option<String>,
    pub request: serde_json::Value,
    pub user_id: Option<String>,
    pub worker_host: Option<String>,
    pub started: Option<JobTimestamp>,
    pub completed: Option<JobTimestamp>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    next_job_id: i64,
    next_batch_id: i64,
    next_collection_id: i64,
    jobs: BTreeMap<i64, StoredJob>,
    batches: BTreeMap<i64, Batch>,
    /// Every write as `(job_id, state)`, in order
    history: Vec<(i64, JobState)>,
    collections: HashMap<CollectionKey, (i64, CollectionType)>,
    task_log: HashMap<(i64, String), TaskLogEntry>,
}

/// Store backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    state: Mutex<InMemoryState>,
    failing: AtomicBool,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail until reset
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn job(&self, job_id: i64) -> Option<StoredJob> {
        self.state.lock().jobs.get(&job_id).cloned()
    }

    pub fn jobs(&self) -> Vec<StoredJob> {
        self.state.lock().jobs.values().cloned().collect()
    }

    pub fn batch(&self, batch_id: i64) -> Option<Batch> {
        self.state.lock().batches.get(&batch_id).cloned()
    }

    /// States written for `job_id`, oldest first
    pub fn history(&self, job_id: i64) -> Vec<JobState> {
        self.state
            .lock()
            .history
            .iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, state)| *state)
            .collect()
    }

    pub fn collection(&self, key: &CollectionKey) -> Option<(i64, CollectionType)> {
        self.state.lock().collections.get(key).copied()
    }

    pub fn collection_count(&self) -> usize {
        self.state.lock().collections.len()
    }

    pub fn task_log(&self, collection_id: i64, wip_id: &str) -> Option<TaskLogEntry> {
        self.state
            .lock()
            .task_log
            .get(&(collection_id, wip_id.to_string()))
            .cloned()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store set to fail".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &Job) -> StoreResult<i64> {
        self.check_available()?;
        let request = job.to_json_value()?;
        let mut state = self.state.lock();
        state.next_job_id += 1;
        let job_id = state.next_job_id;
        state.jobs.insert(
            job_id,
            StoredJob {
                job_id,
                batch_id: job.batch_id,
                state: job.state,
                output: job.stored_output().map(str::to_string),
                request,
                user_id: job.user_id.clone(),
                worker_host: job.worker_host.clone(),
                started: job.started,
                completed: job.completed,
            },
        );
        state.history.push((job_id, job.state));
        Ok(job_id)
    }

    async fn update(&self, job_id: i64, job: &Job) -> StoreResult<u64> {
        self.check_available()?;
        let mut state = self.state.lock();
        let Some(row) = state.jobs.get_mut(&job_id) else {
            return Ok(0);
        };
        row.state = job.state;
        row.output = job.stored_output().map(str::to_string);
        row.worker_host = job.worker_host.clone();
        row.started = job.started;
        row.completed = job.completed;
        state.history.push((job_id, job.state));
        Ok(1)
    }

    async fn create_batch(&self, batch: &Batch) -> StoreResult<i64> {
        self.check_available()?;
        let mut state = self.state.lock();
        state.next_batch_id += 1;
        let batch_id = state.next_batch_id;
        state.batches.insert(batch_id, batch.clone());
        Ok(batch_id)
    }

    fn store_name(&self) -> &'static str {
        "in_memory"
    }
}

#[async_trait]
impl TaskLogStore for InMemoryJobStore {
    async fn find_or_create_collection(
        &self,
        key: &CollectionKey,
        kind: CollectionType,
    ) -> StoreResult<i64> {
        self.check_available()?;
        let mut state = self.state.lock();
        if let Some((id, _)) = state.collections.get(key) {
            return Ok(*id);
        }
        state.next_collection_id += 1;
        let id = state.next_collection_id;
        state.collections.insert(key.clone(), (id, kind));
        Ok(id)
    }

    async fn upsert_task_log(&self, collection_id: i64, entry: &TaskLogEntry) -> StoreResult<()> {
        self.check_available()?;
        self.state
            .lock()
            .task_log
            .insert((collection_id, entry.wip_id.clone()), entry.clone());
        Ok(())
    }
}
