//! Coordinator-backed persistence for in-flight export job progress.
//!
//! An [`ExportJob`] lives at `audit_export:<tenant>:<job_id>` with a TTL
//! ending at `expires_at`; [`ExportJobStore::count_in_flight`] scans that
//! key pattern to enforce a tenant's `max_concurrent_exports` limit without
//! a separate counter to keep consistent.

use chrono::{Duration as ChronoDuration, Utc};
use meridian_core::{ExportFormat, ExportJob, ExportStatus};
use redis::AsyncCommands;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ExportJobStoreError {
    #[error("coordinator error: {0}")]
    Coordinator(#[from] redis::RedisError),
    #[error("export job serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("export job {0} not found")]
    NotFound(Uuid),
}

pub struct ExportJobStore {
    client: redis::Client,
}

impl ExportJobStore {
    pub fn new(redis_url: &str) -> Result<Self, ExportJobStoreError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }

    pub async fn create(
        &self,
        tenant_id: Uuid,
        requested_by: &str,
        format: ExportFormat,
        total_records: Option<u64>,
        ttl: Duration,
    ) -> Result<ExportJob, ExportJobStoreError> {
        let job = ExportJob {
            id: Uuid::new_v4(),
            tenant_id,
            requested_by: requested_by.to_string(),
            format,
            status: ExportStatus::Pending,
            file_path: None,
            processed_records: 0,
            total_records,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
            expires_at: Utc::now() + ChronoDuration::from_std(ttl).unwrap_or_default(),
        };
        self.put(&job, ttl).await?;
        Ok(job)
    }

    pub async fn get(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
    ) -> Result<Option<ExportJob>, ExportJobStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = meridian_core::keys::audit_export_job_key(tenant_id, job_id);
        let raw: Option<String> = conn.get(&key).await?;
        raw.map(|s| serde_json::from_str(&s)).transpose().map_err(Into::into)
    }

    pub async fn update_progress(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        processed_records: u64,
    ) -> Result<(), ExportJobStoreError> {
        let mut job = self
            .get(tenant_id, job_id)
            .await?
            .ok_or(ExportJobStoreError::NotFound(job_id))?;
        job.status = ExportStatus::Streaming;
        job.processed_records = processed_records;
        self.put(&job, remaining_ttl(&job)).await
    }

    pub async fn complete(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        file_path: &str,
        processed_records: u64,
    ) -> Result<(), ExportJobStoreError> {
        let mut job = self
            .get(tenant_id, job_id)
            .await?
            .ok_or(ExportJobStoreError::NotFound(job_id))?;
        job.status = ExportStatus::Completed;
        job.file_path = Some(file_path.to_string());
        job.processed_records = processed_records;
        job.completed_at = Some(Utc::now());
        self.put(&job, remaining_ttl(&job)).await
    }

    pub async fn fail(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        error: &str,
    ) -> Result<(), ExportJobStoreError> {
        let mut job = self
            .get(tenant_id, job_id)
            .await?
            .ok_or(ExportJobStoreError::NotFound(job_id))?;
        job.status = ExportStatus::Failed;
        job.error = Some(error.to_string());
        job.completed_at = Some(Utc::now());
        self.put(&job, remaining_ttl(&job)).await
    }

    /// Counts non-terminal export jobs for `tenant_id` by scanning the
    /// `audit_export:<tenant>:*` key pattern. Used to enforce
    /// `max_concurrent_exports` before a new export is allowed to start.
    pub async fn count_in_flight(&self, tenant_id: Uuid) -> Result<usize, ExportJobStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let pattern = meridian_core::keys::audit_export_job_scan_pattern(tenant_id);

        let mut count = 0usize;
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            for key in keys {
                let raw: Option<String> = conn.get(&key).await?;
                let Some(raw) = raw else { continue };
                if let Ok(job) = serde_json::from_str::<ExportJob>(&raw) {
                    if !job.status.is_terminal() {
                        count += 1;
                    }
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(count)
    }

    async fn put(&self, job: &ExportJob, ttl: Duration) -> Result<(), ExportJobStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = meridian_core::keys::audit_export_job_key(job.tenant_id, job.id);
        let raw = serde_json::to_string(job)?;
        let ttl_secs = ttl.as_secs().max(1);
        let _: () = conn.set_ex(&key, raw, ttl_secs).await?;
        Ok(())
    }
}

fn remaining_ttl(job: &ExportJob) -> Duration {
    let secs = (job.expires_at - Utc::now()).num_seconds();
    Duration::from_secs(secs.max(1) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_opens_client_without_connecting() {
        let store = ExportJobStore::new("redis://127.0.0.1/").unwrap();
        let _ = store;
    }

    #[test]
    fn remaining_ttl_never_hits_zero() {
        let job = ExportJob {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            requested_by: "user@example.com".into(),
            format: ExportFormat::Csv,
            status: ExportStatus::Pending,
            file_path: None,
            processed_records: 0,
            total_records: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
            expires_at: Utc::now() - ChronoDuration::seconds(30),
        };
        assert_eq!(remaining_ttl(&job), Duration::from_secs(1));
    }
}
