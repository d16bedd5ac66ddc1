//! Meridian core: shared domain types, error taxonomy and settings for the
//! crawl orchestration core.
//!
//! This crate has no I/O of its own. It defines the vocabulary every other
//! `meridian-*` crate builds on: [`Tenant`], [`Job`], [`CrawlRun`], the slot
//! counter key space, [`AuditLogEntry`], [`RetentionPolicy`] and
//! [`ExportJob`], plus [`MeridianSettings`] for environment-sourced
//! configuration.

pub mod config;
pub mod domain;
pub mod error;
pub mod keys;

pub use config::MeridianSettings;
pub use domain::{
    AuditLogEntry, CrawlRun, CrawlRunStatus, ExportFormat, ExportJob, ExportStatus, Job,
    JobStatus, MetadataValue, RetentionPolicy, SlotCounter, TaskKind, Tenant,
};
pub use error::MeridianError;
