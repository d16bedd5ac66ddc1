use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlRunStatus {
    InProgress,
    Completed,
    Aborted,
}

/// One execution of a crawl job. A `Job` may be retried across several
/// `CrawlRun`s; the run record is what the watchdog and feeder reconcile
/// against the slot counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlRun {
    pub id: Uuid,
    pub job_id: Uuid,
    pub tenant_id: Uuid,
    pub status: CrawlRunStatus,
    pub pages_crawled: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
