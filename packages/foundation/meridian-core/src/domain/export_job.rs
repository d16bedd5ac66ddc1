use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Csv,
    Jsonl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Pending,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl ExportStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExportStatus::Completed | ExportStatus::Failed | ExportStatus::Cancelled
        )
    }
}

/// Progress record for one in-flight (or recently finished) audit export,
/// persisted in the coordinator at `audit_export:<tenant>:<job_id>` with a
/// TTL ending at `expires_at`. A per-tenant count of live keys under that
/// pattern is the `max_concurrent_exports` guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub requested_by: String,
    pub format: ExportFormat,
    pub status: ExportStatus,
    pub file_path: Option<String>,
    pub processed_records: u64,
    pub total_records: Option<u64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl ExportJob {
    /// Fraction complete in `[0.0, 1.0]`; `0.0` when the total is unknown.
    pub fn progress(&self) -> f32 {
        match self.total_records {
            Some(0) => 1.0,
            Some(total) => (self.processed_records as f32 / total as f32).min(1.0),
            None => 0.0,
        }
    }
}
