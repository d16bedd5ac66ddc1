//! Persistent job state, backed by Postgres.
//!
//! Every status transition is a single `UPDATE ... WHERE status = $expected
//! RETURNING *` — compare-and-swap expressed directly as SQL, so two
//! processes racing to claim or fail the same job never both succeed. A job
//! is never deleted; terminal rows are retained for audit.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meridian_core::{Job, JobStatus, TaskKind};
use meridian_feeder::{FeederError, JobQueue};
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum JobRepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid job status in database: {0}")]
    InvalidStatus(String),
}

#[derive(FromRow)]
struct JobRow {
    id: Uuid,
    tenant_id: Uuid,
    task_kind: serde_json::Value,
    status: String,
    user_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    error_message: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = JobRepositoryError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::from_str(&row.status).map_err(JobRepositoryError::InvalidStatus)?;
        let task: TaskKind = serde_json::from_value(row.task_kind)
            .map_err(|e| JobRepositoryError::InvalidStatus(e.to_string()))?;
        Ok(Job {
            id: row.id,
            tenant_id: row.tenant_id,
            task,
            status,
            user_id: row.user_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            error_message: row.error_message,
        })
    }
}

const SELECT_COLUMNS: &str =
    "id, tenant_id, task_kind, status, user_id, created_at, updated_at, error_message";

#[derive(Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a new `Queued` job.
    pub async fn create(
        &self,
        tenant_id: Uuid,
        task: TaskKind,
        user_id: Uuid,
    ) -> Result<Job, JobRepositoryError> {
        let task_kind =
            serde_json::to_value(&task).map_err(|e| JobRepositoryError::InvalidStatus(e.to_string()))?;
        let row: JobRow = sqlx::query_as(&format!(
            "INSERT INTO jobs (id, tenant_id, task_kind, status, user_id, created_at, updated_at) \
             VALUES ($1, $2, $3, 'queued', $4, now(), now()) \
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(task_kind)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Option<Job>, JobRepositoryError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    /// Bumps `updated_at` without changing status — the heartbeat a
    /// long-running crawl writes periodically, and what watchdog Phase 2
    /// writes when it rescues a stale-but-still-queued job.
    pub async fn touch_job(&self, job_id: Uuid) -> Result<bool, JobRepositoryError> {
        let result = sqlx::query("UPDATE jobs SET updated_at = now() WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Compare-and-swap a job's status. Returns `false` (no error) if the
    /// job was not in `expected` when the update ran — the caller decides
    /// whether that race matters.
    pub async fn transition(
        &self,
        job_id: Uuid,
        expected: JobStatus,
        next: JobStatus,
    ) -> Result<bool, JobRepositoryError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = $1, updated_at = now() WHERE id = $2 AND status = $3",
        )
        .bind(next.as_str())
        .bind(job_id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Fails a job only if it is still `in_progress` — the CAS op a
    /// crawl worker uses to report its own failure without racing the
    /// watchdog, which may have already failed the same job for
    /// going stale. Returns the number of rows the update actually
    /// touched (0 or 1), not just a boolean, so callers can distinguish
    /// "I won the race" from "something else already changed this job".
    pub async fn mark_job_failed_if_running(
        &self,
        job_id: Uuid,
        error_message: &str,
    ) -> Result<u64, JobRepositoryError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', error_message = $2, updated_at = now() \
             WHERE id = $1 AND status = 'in_progress'",
        )
        .bind(job_id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// CAS `in_progress -> complete`.
    pub async fn mark_job_complete(&self, job_id: Uuid) -> Result<bool, JobRepositoryError> {
        self.transition(job_id, JobStatus::InProgress, JobStatus::Complete).await
    }

    /// Fails a job from either non-terminal status (`queued` or
    /// `in_progress`), matching the graph's direct `queued -> failed` edge
    /// as well as the normal in-flight failure path.
    pub async fn mark_job_failed(
        &self,
        job_id: Uuid,
        error_message: &str,
    ) -> Result<bool, JobRepositoryError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', error_message = $2, updated_at = now() \
             WHERE id = $1 AND status IN ('queued', 'in_progress')",
        )
        .bind(job_id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl JobQueue for JobRepository {
    async fn tenants_with_queued_jobs(&self) -> Result<Vec<Uuid>, FeederError> {
        sqlx::query_scalar("SELECT DISTINCT tenant_id FROM jobs WHERE status = 'queued'")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| FeederError::JobSource(e.to_string()))
    }

    async fn next_queued(&self, tenant_id: Uuid) -> Result<Option<Job>, FeederError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM jobs \
             WHERE tenant_id = $1 AND status = 'queued' ORDER BY created_at ASC LIMIT 1"
        ))
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FeederError::JobSource(e.to_string()))?;

        row.map(TryInto::try_into)
            .transpose()
            .map_err(|e: JobRepositoryError| FeederError::JobSource(e.to_string()))
    }

    async fn try_start(&self, job_id: Uuid) -> Result<bool, FeederError> {
        self.transition(job_id, JobStatus::Queued, JobStatus::InProgress)
            .await
            .map_err(|e| FeederError::JobSource(e.to_string()))
    }
}
