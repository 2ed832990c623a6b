//! PostgreSQL job store.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use super::collection::{CollectionKey, CollectionType};
use super::store::{JobStore, StoreResult, TaskLogEntry, TaskLogStore};
use crate::config::DatabaseConfig;
use crate::models::{Batch, Job, JobTimestamp};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Job store over a shared connection pool
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the database section, applying migrations when configured to
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .connect(&config.url)
            .await?;

        if config.run_migrations {
            MIGRATOR.run(&pool).await?;
            info!("💾 DATABASE: Migrations applied");
        }

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn naive(ts: Option<JobTimestamp>) -> Option<chrono::NaiveDateTime> {
    ts.map(|ts| ts.as_naive())
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &Job) -> StoreResult<i64> {
        let request = job.to_json_value()?;
        let job_id: i64 = sqlx::query_scalar(
            "INSERT INTO job
                (batch_id, state, output, request, user_id, worker_host, started, completed)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING job_id",
        )
        .bind(job.batch_id)
        .bind(job.state.as_str())
        .bind(job.stored_output())
        .bind(request)
        .bind(job.user_id.as_deref())
        .bind(job.worker_host.as_deref())
        .bind(naive(job.started))
        .bind(naive(job.completed))
        .fetch_one(&self.pool)
        .await?;

        debug!(job_id, batch_id = ?job.batch_id, "Inserted job");
        Ok(job_id)
    }

    async fn update(&self, job_id: i64, job: &Job) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE job
             SET state = $1, output = $2, worker_host = $3, started = $4, completed = $5
             WHERE job_id = $6",
        )
        .bind(job.state.as_str())
        .bind(job.stored_output())
        .bind(job.worker_host.as_deref())
        .bind(naive(job.started))
        .bind(naive(job.completed))
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn create_batch(&self, batch: &Batch) -> StoreResult<i64> {
        let batch_id: i64 = sqlx::query_scalar(
            "INSERT INTO batch (user_id, cmd_line) VALUES ($1, $2) RETURNING batch_id",
        )
        .bind(&batch.user_id)
        .bind(&batch.cmd_line)
        .fetch_one(&self.pool)
        .await?;
        Ok(batch_id)
    }

    fn store_name(&self) -> &'static str {
        "postgres"
    }
}

#[async_trait]
impl TaskLogStore for PgJobStore {
    async fn find_or_create_collection(
        &self,
        key: &CollectionKey,
        kind: CollectionType,
    ) -> StoreResult<i64> {
        // The no-op update makes RETURNING yield the existing row on conflict
        let collection_id: i64 = sqlx::query_scalar(
            "INSERT INTO collection (provider, collection, type)
             VALUES ($1, $2, $3)
             ON CONFLICT (provider, collection)
             DO UPDATE SET provider = EXCLUDED.provider
             RETURNING collection_id",
        )
        .bind(&key.provider)
        .bind(&key.collection)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(collection_id)
    }

    async fn upsert_task_log(&self, collection_id: i64, entry: &TaskLogEntry) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO task_queue_log
                (collection_id, wip_id, state, user_id, worker_host, started, completed)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (collection_id, wip_id) DO UPDATE
             SET state = EXCLUDED.state,
                 user_id = EXCLUDED.user_id,
                 worker_host = EXCLUDED.worker_host,
                 started = EXCLUDED.started,
                 completed = EXCLUDED.completed",
        )
        .bind(collection_id)
        .bind(&entry.wip_id)
        .bind(entry.state.as_str())
        .bind(&entry.user_id)
        .bind(entry.worker_host.as_deref())
        .bind(naive(entry.started))
        .bind(naive(entry.completed))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
