use chrono::Utc;
use meridian_capacity::ReconcileOutcome;
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use meridian_capacity::CapacityManager;

use crate::WatchdogError;

/// Per-tenant queued-job staleness threshold is clamped to this range
/// regardless of what a tenant's `crawler_settings` configures.
const QUEUED_STALE_MIN_MINUTES: i64 = 5;
const QUEUED_STALE_MAX_MINUTES: i64 = 60;
const QUEUED_STALE_DEFAULT_MINUTES: i64 = 15;

/// A slot that must be released in the coordinator once the phase's writes
/// have committed. Kept separate from the DB write itself (the "collector
/// pattern") so a mid-transaction failure never leaves a slot released
/// without the corresponding job status change having landed.
#[derive(Debug, Clone)]
pub struct SlotReleaseJob {
    pub tenant_id: Uuid,
    pub job_id: Uuid,
}

#[derive(Debug, Default)]
pub struct Phase0Result {
    pub counters_reconciled: usize,
    pub zombie_counters_cleared: usize,
}

#[derive(Debug, Default)]
pub struct PhaseResult {
    pub jobs_affected: usize,
    pub slot_releases: Vec<SlotReleaseJob>,
}

#[derive(Debug)]
pub struct CleanupMetrics {
    pub counters_reconciled: usize,
    pub zombie_counters_cleared: usize,
    pub jobs_killed: usize,
    pub jobs_rescued: usize,
    pub jobs_failed_stalled_startup: usize,
    pub jobs_failed_long_running: usize,
    pub slots_released: usize,
}

impl CleanupMetrics {
    pub fn log(&self) {
        tracing::info!(
            counters_reconciled = self.counters_reconciled,
            zombie_counters_cleared = self.zombie_counters_cleared,
            jobs_killed = self.jobs_killed,
            jobs_rescued = self.jobs_rescued,
            jobs_failed_stalled_startup = self.jobs_failed_stalled_startup,
            jobs_failed_long_running = self.jobs_failed_long_running,
            slots_released = self.slots_released,
            "watchdog cleanup sweep complete"
        );
    }
}

/// Phase 0: recomputes each tenant's actual in-flight crawl count from the
/// database (`queued` + `in_progress` crawl jobs) and CAS-reconciles it
/// into the coordinator counter, clearing "zombie" counters left behind
/// for tenants with no crawl activity at all. A mismatch (someone else
/// wrote the counter between the read and the reconcile) is logged and
/// left for the next sweep rather than forced.
pub async fn run_phase0_reconciliation(
    tx: &mut Transaction<'_, Postgres>,
    capacity: &Arc<CapacityManager>,
) -> Result<Phase0Result, WatchdogError> {
    let rows: Vec<(Uuid, i64)> = sqlx::query_as(
        "SELECT tenant_id, COUNT(*) FROM jobs \
         WHERE status IN ('queued', 'in_progress') AND task_kind->>'kind' = 'crawl' \
         GROUP BY tenant_id",
    )
    .fetch_all(&mut **tx)
    .await?;

    let mut counters_reconciled = 0;
    for (tenant_id, count) in &rows {
        if reconcile_one(capacity, *tenant_id, *count as u32).await {
            counters_reconciled += 1;
        }
    }

    let distinct_tenants: Vec<Uuid> =
        sqlx::query_scalar("SELECT DISTINCT id FROM tenants WHERE is_active")
            .fetch_all(&mut **tx)
            .await
            .unwrap_or_default();

    let active_tenants: std::collections::HashSet<Uuid> =
        rows.iter().map(|(id, _)| *id).collect();

    let mut zombie_counters_cleared = 0;
    for tenant_id in distinct_tenants {
        if !active_tenants.contains(&tenant_id) && reconcile_one(capacity, tenant_id, 0).await {
            zombie_counters_cleared += 1;
        }
    }

    Ok(Phase0Result {
        counters_reconciled,
        zombie_counters_cleared,
    })
}

async fn reconcile_one(capacity: &Arc<CapacityManager>, tenant_id: Uuid, actual: u32) -> bool {
    let current = match capacity.current_usage(tenant_id).await {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(%tenant_id, error = %err, "could not read slot counter for reconciliation");
            return false;
        }
    };

    match capacity.reconcile(tenant_id, current, actual).await {
        Ok(ReconcileOutcome::Reconciled) => true,
        Ok(ReconcileOutcome::Mismatch { observed }) => {
            tracing::warn!(%tenant_id, current, observed, actual, "slot counter reconcile mismatch, deferring to next sweep");
            false
        }
        Err(err) => {
            tracing::warn!(%tenant_id, error = %err, "slot counter reconcile failed");
            false
        }
    }
}

/// Phase 1: kills `queued` jobs that have waited longer than
/// `crawl_job_max_age` since creation without ever being promoted. These
/// never held a crawl slot, so nothing needs releasing for them.
pub async fn kill_expired_jobs(
    tx: &mut Transaction<'_, Postgres>,
    crawl_job_max_age: Duration,
) -> Result<PhaseResult, WatchdogError> {
    let cutoff = Utc::now() - chrono::Duration::from_std(crawl_job_max_age).unwrap_or_default();

    let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
        "UPDATE jobs SET status = 'failed', error_message = 'expired before being started', \
         updated_at = now() \
         WHERE status = 'queued' AND created_at < $1 \
         RETURNING id, tenant_id",
    )
    .bind(cutoff)
    .fetch_all(&mut **tx)
    .await?;

    Ok(to_phase_result(rows))
}

/// Phase 2: requeues `queued` jobs whose `updated_at` has gone stale past
/// the owning tenant's `queued_stale_threshold_minutes` (clamped to
/// [5, 60] minutes, defaulting to 15 when unset). Bumps `updated_at` so
/// the feeder naturally reattempts dispatch; these jobs are still queued,
/// so there is nothing to release or requeue by job_id beyond that.
pub async fn rescue_stuck_jobs(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<PhaseResult, WatchdogError> {
    let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(&format!(
        "UPDATE jobs j SET updated_at = now() \
         FROM tenants t \
         WHERE j.tenant_id = t.id \
           AND j.status = 'queued' \
           AND j.updated_at < now() - make_interval(mins => LEAST(GREATEST( \
                 COALESCE((t.crawler_settings ->> 'queued_stale_threshold_minutes')::bigint, {QUEUED_STALE_DEFAULT_MINUTES}), \
                 {QUEUED_STALE_MIN_MINUTES}), {QUEUED_STALE_MAX_MINUTES})) \
         RETURNING j.id, j.tenant_id"
    ))
    .fetch_all(&mut **tx)
    .await?;

    Ok(to_phase_result(rows))
}

/// Phase 3.5: `in_progress` jobs that have produced no pages at all
/// (`CrawlRun.pages_crawled IS NULL OR 0`, including jobs with no crawl
/// run row yet) and have gone stale past `startup_timeout` are failed as
/// stalled startups — distinct from Phase 3's general long-running check,
/// and must run before it so a job this phase fails doesn't also get
/// caught (redundantly, under the wrong reason) by Phase 3.
pub async fn fail_stalled_startup_jobs(
    tx: &mut Transaction<'_, Postgres>,
    startup_timeout: Duration,
) -> Result<PhaseResult, WatchdogError> {
    let cutoff = Utc::now() - chrono::Duration::from_std(startup_timeout).unwrap_or_default();

    let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
        "UPDATE jobs j SET status = 'failed', \
         error_message = 'stalled during startup: no pages crawled', updated_at = now() \
         FROM (SELECT j2.id FROM jobs j2 \
               LEFT JOIN crawl_runs cr ON cr.job_id = j2.id \
               WHERE j2.status = 'in_progress' \
                 AND (cr.pages_crawled IS NULL OR cr.pages_crawled = 0) \
                 AND j2.updated_at < $1) stalled \
         WHERE j.id = stalled.id \
         RETURNING j.id, j.tenant_id",
    )
    .bind(cutoff)
    .fetch_all(&mut **tx)
    .await?;

    Ok(to_phase_result(rows))
}

/// Phase 3: `in_progress` jobs whose heartbeat (`updated_at`) has gone
/// stale past `long_running_threshold` are failed outright. Deliberately
/// keyed on `updated_at`, not `started_at` — a crawl that has run a long
/// time but is still heartbeating is not stuck.
pub async fn fail_long_running_jobs(
    tx: &mut Transaction<'_, Postgres>,
    long_running_threshold: Duration,
) -> Result<PhaseResult, WatchdogError> {
    let cutoff =
        Utc::now() - chrono::Duration::from_std(long_running_threshold).unwrap_or_default();

    let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
        "UPDATE jobs SET status = 'failed', error_message = 'exceeded maximum run duration', \
         updated_at = now() \
         WHERE status = 'in_progress' AND updated_at < $1 \
         RETURNING id, tenant_id",
    )
    .bind(cutoff)
    .fetch_all(&mut **tx)
    .await?;

    Ok(to_phase_result(rows))
}

fn to_phase_result(rows: Vec<(Uuid, Uuid)>) -> PhaseResult {
    let jobs_affected = rows.len();
    let slot_releases = rows
        .into_iter()
        .map(|(job_id, tenant_id)| SlotReleaseJob { tenant_id, job_id })
        .collect();
    PhaseResult {
        jobs_affected,
        slot_releases,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_phase_result_preserves_job_and_tenant_pairing() {
        let job_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();
        let result = to_phase_result(vec![(job_id, tenant_id)]);
        assert_eq!(result.jobs_affected, 1);
        assert_eq!(result.slot_releases[0].job_id, job_id);
        assert_eq!(result.slot_releases[0].tenant_id, tenant_id);
    }

    #[test]
    fn to_phase_result_empty() {
        let result = to_phase_result(vec![]);
        assert_eq!(result.jobs_affected, 0);
        assert!(result.slot_releases.is_empty());
    }

    #[test]
    fn queued_stale_threshold_bounds_are_sane() {
        assert!(QUEUED_STALE_MIN_MINUTES < QUEUED_STALE_MAX_MINUTES);
        assert!((QUEUED_STALE_MIN_MINUTES..=QUEUED_STALE_MAX_MINUTES)
            .contains(&QUEUED_STALE_DEFAULT_MINUTES));
    }
}
