//! Streaming audit log export to CSV or JSONL.
//!
//! Export never loads the whole result set into memory: rows are pulled
//! from [`AuditLogSource`] in batches and written straight to an output
//! stream. A row count ceiling ([`ExportError::TooLarge`]) is checked
//! against the *total* count before any row is written, so an oversized
//! export fails fast rather than filling a disk first.

mod export_job_store;
mod postgres;
mod sanitize;
mod service;

pub use export_job_store::{ExportJobStore, ExportJobStoreError};
pub use postgres::PgAuditLogSource;
pub use sanitize::sanitize_csv_cell;
pub use service::{AuditExportService, AuditLogFilter, AuditLogSource, ExportError};

pub const CSV_HEADERS: &[&str] = &[
    "Timestamp",
    "Actor ID",
    "Actor Type",
    "Action",
    "Entity Type",
    "Entity ID",
    "Description",
    "Outcome",
    "Error Message",
    "Metadata",
];
