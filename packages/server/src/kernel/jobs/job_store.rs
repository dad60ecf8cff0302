//! Durable job storage.
//!
//! [`JobStore`] is the narrow CRUD contract the processor consumes. Every
//! method is individually atomic; the processor layers no locking on top.
//!
//! [`PostgresJobStore`] is the production implementation. State transitions
//! are conditional updates on the current status, so a lost race shows up as
//! `Ok(None)` rather than a double transition.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::{Job, JobKind};

/// Storage contract for job rows.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new Pending job.
    async fn create(
        &self,
        kind: JobKind,
        entity_id: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<Job>;

    /// Insert a fully-formed job row as-is.
    async fn insert(&self, job: Job) -> Result<Job>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>>;

    /// Up to `limit` Pending jobs, oldest `created_at` first.
    async fn find_pending_jobs(&self, limit: i64) -> Result<Vec<Job>>;

    /// Atomically claim a Pending job: set Processing and stamp `started_at`.
    ///
    /// Returns `None` if the row is missing or no longer Pending.
    async fn mark_as_started(&self, id: Uuid) -> Result<Option<Job>>;

    /// Processing -> Completed, stamping `completed_at`.
    async fn mark_as_completed(&self, id: Uuid) -> Result<Option<Job>>;

    /// Processing -> Failed, persisting the error and stamping `completed_at`.
    async fn mark_as_failed(&self, id: Uuid, error_message: &str) -> Result<Option<Job>>;

    /// Processing -> Pending with `retry_count + 1` and the last error recorded.
    async fn increment_retry_count(&self, id: Uuid, error_message: &str) -> Result<Option<Job>>;
}

/// PostgreSQL-backed job store.
#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a fresh pool to `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled `jobs` table migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create(
        &self,
        kind: JobKind,
        entity_id: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<Job> {
        self.insert(Job::new(kind, entity_id, payload)).await
    }

    async fn insert(&self, job: Job) -> Result<Job> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (
                id, kind, status, entity_id, payload, error_message,
                created_at, started_at, completed_at, retry_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(job.kind)
        .bind(job.status)
        .bind(&job.entity_id)
        .bind(&job.payload)
        .bind(&job.error_message)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.retry_count)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to insert job {}", job.id))?;

        Ok(job)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to load job {}", id))?;

        Ok(job)
    }

    async fn find_pending_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM jobs
            WHERE status = 'PENDING'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to load pending jobs")?;

        Ok(jobs)
    }

    async fn mark_as_started(&self, id: Uuid) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'PROCESSING',
                started_at = GREATEST(NOW(), created_at)
            WHERE id = $1 AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to mark job {} as started", id))?;

        Ok(job)
    }

    async fn mark_as_completed(&self, id: Uuid) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'COMPLETED',
                error_message = NULL,
                completed_at = GREATEST(NOW(), started_at)
            WHERE id = $1 AND status = 'PROCESSING'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to mark job {} as completed", id))?;

        Ok(job)
    }

    async fn mark_as_failed(&self, id: Uuid, error_message: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'FAILED',
                error_message = $2,
                completed_at = GREATEST(NOW(), started_at)
            WHERE id = $1 AND status = 'PROCESSING'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(error_message)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to mark job {} as failed", id))?;

        Ok(job)
    }

    async fn increment_retry_count(&self, id: Uuid, error_message: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'PENDING',
                retry_count = retry_count + 1,
                error_message = $2
            WHERE id = $1 AND status = 'PROCESSING'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(error_message)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to schedule retry for job {}", id))?;

        Ok(job)
    }
}
