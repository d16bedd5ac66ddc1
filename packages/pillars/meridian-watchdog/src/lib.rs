//! Transaction-safe sweep that reconciles orphaned jobs and slot counters.
//!
//! Every phase below runs inside a single `sqlx::Transaction`. Slots are
//! never released from inside the transaction: each phase only *collects*
//! [`SlotReleaseJob`] descriptors, and the caller releases them against the
//! coordinator only after the transaction commits. A crash or rollback
//! between phases therefore cannot leak or double-release a slot.

mod phases;

pub use phases::{CleanupMetrics, SlotReleaseJob};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use meridian_capacity::CapacityManager;
use sqlx::PgPool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct WatchdogConfig {
    /// Queued jobs older than this (by `created_at`) are killed by Phase 1.
    pub crawl_job_max_age: Duration,
    /// `in_progress` jobs with no crawled pages stall past this age are
    /// failed by Phase 3.5.
    pub startup_timeout: Duration,
    /// `in_progress` jobs with no heartbeat past this age are failed by
    /// Phase 3.
    pub long_running_threshold: Duration,
}

pub struct OrphanWatchdog {
    pool: PgPool,
    capacity: Arc<CapacityManager>,
    config: WatchdogConfig,
}

impl OrphanWatchdog {
    pub fn new(pool: PgPool, capacity: Arc<CapacityManager>, config: WatchdogConfig) -> Self {
        Self {
            pool,
            capacity,
            config,
        }
    }

    /// Runs one full cleanup pass: phase 0 (counter reconciliation), phase 1
    /// (kill expired queued jobs), phase 2 (rescue stuck queued jobs),
    /// phase 3.5 (fail stalled startups with no crawled pages), phase 3
    /// (fail long-running jobs with no heartbeat). Slots collected across
    /// all phases are released only after the transaction that performed
    /// the corresponding status writes has committed, and only for jobs
    /// that actually hold a pre-acquired slot marker.
    pub async fn run_cleanup(&self) -> Result<CleanupMetrics, WatchdogError> {
        let mut tx = self.pool.begin().await?;

        let phase0 = phases::run_phase0_reconciliation(&mut tx, &self.capacity).await?;
        let phase1 = phases::kill_expired_jobs(&mut tx, self.config.crawl_job_max_age).await?;
        let phase2 = phases::rescue_stuck_jobs(&mut tx).await?;
        let phase3_5 =
            phases::fail_stalled_startup_jobs(&mut tx, self.config.startup_timeout).await?;
        let phase3 =
            phases::fail_long_running_jobs(&mut tx, self.config.long_running_threshold).await?;

        tx.commit().await?;

        let mut release_jobs = Vec::new();
        release_jobs.extend(phase1.slot_releases);
        release_jobs.extend(phase3_5.slot_releases);
        release_jobs.extend(phase3.slot_releases);

        let released = self.release_slots_safe(&release_jobs).await;

        let metrics = CleanupMetrics {
            counters_reconciled: phase0.counters_reconciled,
            zombie_counters_cleared: phase0.zombie_counters_cleared,
            jobs_killed: phase1.jobs_affected,
            jobs_rescued: phase2.jobs_affected,
            jobs_failed_stalled_startup: phase3_5.jobs_affected,
            jobs_failed_long_running: phase3.jobs_affected,
            slots_released: released,
        };
        metrics.log();

        if let Err(err) = self.capacity.record_watchdog_success(Utc::now().timestamp()).await {
            tracing::warn!(error = %err, "failed to record watchdog liveness heartbeat");
        }

        Ok(metrics)
    }

    /// Releases a collected slot only for jobs that actually hold a
    /// pre-acquired slot marker — a job Phase 1 kills while still queued,
    /// for instance, never held one, and must not be released for. Clears
    /// the marker once released so a repeat sweep does not release twice.
    async fn release_slots_safe(&self, jobs: &[SlotReleaseJob]) -> usize {
        let mut released = 0;
        for job in jobs {
            match self.capacity.get_preacquired_tenant(job.job_id).await {
                Ok(Some(_)) => {}
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(
                        tenant_id = %job.tenant_id,
                        job_id = %job.job_id,
                        error = %err,
                        "failed to check preacquired slot marker"
                    );
                    continue;
                }
            }

            match self.capacity.release(job.tenant_id).await {
                Ok(_) => {
                    self.capacity.clear_preacquired_flag(job.job_id).await.ok();
                    released += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        tenant_id = %job.tenant_id,
                        job_id = %job.job_id,
                        error = %err,
                        "failed to release slot after watchdog sweep"
                    );
                }
            }
        }
        released
    }
}
