use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meridian_core::{AuditLogEntry, ExportFormat, ExportJob};
use thiserror::Error;
use uuid::Uuid;

use crate::export_job_store::{ExportJobStore, ExportJobStoreError};
use crate::sanitize::sanitize_csv_cell;
use crate::CSV_HEADERS;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export would include {count} rows, over the limit of {limit}")]
    TooLarge { count: u64, limit: u64 },
    #[error("export cancelled after {rows_written} rows")]
    Cancelled { rows_written: u64 },
    #[error("tenant {tenant_id} already has {limit} exports in flight")]
    TooManyConcurrentExports { tenant_id: Uuid, limit: usize },
    #[error("source error: {0}")]
    Source(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("export job store error: {0}")]
    JobStore(#[from] ExportJobStoreError),
}

#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub tenant_id: Uuid,
    pub category: Option<String>,
    pub action: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl AuditLogFilter {
    pub fn for_tenant(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            ..Default::default()
        }
    }
}

/// Paginated access to the audit log, so export never needs the whole
/// result set materialized.
#[async_trait]
pub trait AuditLogSource: Send + Sync {
    async fn total_count(&self, filter: &AuditLogFilter) -> Result<u64, ExportError>;

    async fn fetch_batch(
        &self,
        filter: &AuditLogFilter,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<AuditLogEntry>, ExportError>;
}

pub struct AuditExportService<S> {
    source: S,
    stream_batch_size: u64,
    memory_limit: u64,
    job_tracking: Option<JobTracking>,
}

struct JobTracking {
    store: Arc<ExportJobStore>,
    max_concurrent_exports: usize,
    export_ttl: Duration,
}

impl<S: AuditLogSource> AuditExportService<S> {
    pub fn new(source: S, stream_batch_size: u64, memory_limit: u64) -> Self {
        Self {
            source,
            stream_batch_size,
            memory_limit,
            job_tracking: None,
        }
    }

    /// Enables export-job persistence: every tracked export is recorded in
    /// the coordinator and counted against `max_concurrent_exports` for its
    /// tenant before it is allowed to start.
    pub fn with_job_tracking(
        mut self,
        store: Arc<ExportJobStore>,
        max_concurrent_exports: usize,
        export_ttl: Duration,
    ) -> Self {
        self.job_tracking = Some(JobTracking {
            store,
            max_concurrent_exports,
            export_ttl,
        });
        self
    }

    async fn check_size(&self, filter: &AuditLogFilter) -> Result<u64, ExportError> {
        let count = self.source.total_count(filter).await?;
        if count > self.memory_limit {
            return Err(ExportError::TooLarge {
                count,
                limit: self.memory_limit,
            });
        }
        Ok(count)
    }

    /// Streams CSV rows to `writer`, checking the row-count ceiling first.
    /// `cancelled` is polled between batches; when it flips to `true` the
    /// export stops and returns [`ExportError::Cancelled`].
    pub async fn export_csv_stream<W: std::io::Write>(
        &self,
        filter: &AuditLogFilter,
        writer: W,
        cancelled: &AtomicBool,
    ) -> Result<u64, ExportError> {
        self.check_size(filter).await?;

        let mut csv_writer = csv::WriterBuilder::new().from_writer(writer);
        csv_writer.write_record(CSV_HEADERS)?;

        let mut offset = 0u64;
        let mut rows_written = 0u64;
        loop {
            if cancelled.load(Ordering::Relaxed) {
                return Err(ExportError::Cancelled { rows_written });
            }
            let batch = self
                .source
                .fetch_batch(filter, offset, self.stream_batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }
            for entry in &batch {
                csv_writer.write_record(row_to_csv(entry))?;
                rows_written += 1;
            }
            offset += batch.len() as u64;
        }
        csv_writer.flush()?;
        Ok(rows_written)
    }

    /// Streams one JSON object per line to `writer`.
    pub async fn export_jsonl_stream<W: std::io::Write>(
        &self,
        filter: &AuditLogFilter,
        mut writer: W,
        cancelled: &AtomicBool,
    ) -> Result<u64, ExportError> {
        self.check_size(filter).await?;

        let mut offset = 0u64;
        let mut rows_written = 0u64;
        loop {
            if cancelled.load(Ordering::Relaxed) {
                return Err(ExportError::Cancelled { rows_written });
            }
            let batch = self
                .source
                .fetch_batch(filter, offset, self.stream_batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }
            for entry in &batch {
                serde_json::to_writer(&mut writer, entry)?;
                writer.write_all(b"\n")?;
                rows_written += 1;
            }
            offset += batch.len() as u64;
        }
        writer.flush()?;
        Ok(rows_written)
    }

    /// Streams an export to a temp file beside `destination`, then
    /// atomically renames it into place. A partially written export is
    /// never visible at `destination`: either the rename happens after a
    /// full, successful stream, or the temp file is left behind (and the
    /// caller sees an error) while `destination` is untouched.
    pub async fn stream_export_to_file(
        &self,
        filter: &AuditLogFilter,
        destination: &Path,
        format: ExportFormat,
        cancelled: Arc<AtomicBool>,
    ) -> Result<u64, ExportError> {
        let temp_path = temp_path_beside(destination);
        let file = std::fs::File::create(&temp_path)?;

        let rows_written = match format {
            ExportFormat::Csv => self.export_csv_stream(filter, file, &cancelled).await,
            ExportFormat::Jsonl => self.export_jsonl_stream(filter, file, &cancelled).await,
        };

        match rows_written {
            Ok(rows) => {
                tokio::fs::rename(&temp_path, destination).await?;
                tracing::info!(rows, path = %destination.display(), "audit export completed");
                Ok(rows)
            }
            Err(err) => {
                tokio::fs::remove_file(&temp_path).await.ok();
                Err(err)
            }
        }
    }

    /// Same as [`Self::stream_export_to_file`] but records the export as an
    /// [`ExportJob`] in the coordinator, rejecting the request outright if
    /// the tenant is already at `max_concurrent_exports`. Requires
    /// [`Self::with_job_tracking`] to have been called; without it this
    /// behaves exactly like the untracked export.
    pub async fn stream_export_to_file_tracked(
        &self,
        filter: &AuditLogFilter,
        destination: &Path,
        format: ExportFormat,
        cancelled: Arc<AtomicBool>,
        requested_by: &str,
    ) -> Result<ExportJob, ExportError> {
        let Some(tracking) = &self.job_tracking else {
            let rows = self
                .stream_export_to_file(filter, destination, format, cancelled)
                .await?;
            return Ok(ExportJob {
                id: Uuid::new_v4(),
                tenant_id: filter.tenant_id,
                requested_by: requested_by.to_string(),
                format,
                status: meridian_core::ExportStatus::Completed,
                file_path: destination.to_str().map(str::to_string),
                processed_records: rows,
                total_records: Some(rows),
                error: None,
                created_at: Utc::now(),
                completed_at: Some(Utc::now()),
                expires_at: Utc::now(),
            });
        };

        let in_flight = tracking.store.count_in_flight(filter.tenant_id).await?;
        if in_flight >= tracking.max_concurrent_exports {
            return Err(ExportError::TooManyConcurrentExports {
                tenant_id: filter.tenant_id,
                limit: tracking.max_concurrent_exports,
            });
        }

        let total_records = self.source.total_count(filter).await?;
        let mut job = tracking
            .store
            .create(
                filter.tenant_id,
                requested_by,
                format,
                Some(total_records),
                tracking.export_ttl,
            )
            .await?;

        match self
            .stream_export_to_file(filter, destination, format, cancelled)
            .await
        {
            Ok(rows) => {
                tracking
                    .store
                    .complete(
                        job.tenant_id,
                        job.id,
                        &destination.to_string_lossy(),
                        rows,
                    )
                    .await?;
                job.status = meridian_core::ExportStatus::Completed;
                job.file_path = Some(destination.to_string_lossy().to_string());
                job.processed_records = rows;
                Ok(job)
            }
            Err(err) => {
                tracking
                    .store
                    .fail(job.tenant_id, job.id, &err.to_string())
                    .await
                    .ok();
                Err(err)
            }
        }
    }
}

fn temp_path_beside(destination: &Path) -> PathBuf {
    let suffix: u64 = rand::random();
    let mut file_name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    file_name.push(format!(".{suffix:x}.tmp"));
    destination.with_file_name(file_name)
}

/// Column order matches [`CSV_HEADERS`] exactly. CSV/formula-injection
/// sanitization applies only to the free-text cells a user or upstream
/// system might control the leading character of: Description, Error
/// Message and Metadata.
fn row_to_csv(entry: &AuditLogEntry) -> Vec<String> {
    let metadata = serde_json::to_string(&entry.metadata).unwrap_or_default();
    vec![
        entry.created_at.to_rfc3339(),
        entry.actor.clone(),
        entry.actor_type.clone(),
        entry.action.clone(),
        entry.resource_type.clone(),
        entry.resource_id.clone().unwrap_or_default(),
        sanitize_csv_cell(&entry.description),
        entry.outcome.clone(),
        entry
            .error_message
            .as_deref()
            .map(sanitize_csv_cell)
            .unwrap_or_default(),
        sanitize_csv_cell(&metadata),
    ]
}
