mod audit_log;
mod crawl_run;
mod export_job;
mod job;
mod retention_policy;
mod slot_counter;
mod tenant;

pub use audit_log::{AuditLogEntry, MetadataValue};
pub use crawl_run::{CrawlRun, CrawlRunStatus};
pub use export_job::{ExportFormat, ExportJob, ExportStatus};
pub use job::{Job, JobStatus, TaskKind};
pub use retention_policy::RetentionPolicy;
pub use slot_counter::SlotCounter;
pub use tenant::Tenant;
