//! Named key builders for the ephemeral coordinator (Redis) key space.
//!
//! Centralized here so every crate that touches the coordinator agrees on
//! the same key shapes without copy-pasting `format!` calls.

use uuid::Uuid;

/// Active-slot counter for a tenant's concurrent crawls.
pub fn slot_counter_key(tenant_id: Uuid) -> String {
    format!("tenant:{tenant_id}:active_jobs")
}

pub fn slot_reservation_key(tenant_id: Uuid, job_id: Uuid) -> String {
    format!("meridian:slots:{tenant_id}:reservations:{job_id}")
}

/// Marks that `job_id` holds a counted slot (value: the owning tenant id).
/// Presence of this key is what lets the watchdog release a slot safely —
/// a job the feeder never pre-acquired a slot for must never be released.
pub fn job_slot_preacquired_key(job_id: Uuid) -> String {
    format!("job:{job_id}:slot_preacquired")
}

/// Set while a tenant has at least one job eligible for promotion, so the
/// feeder can skip tenants with nothing queued without a full table scan.
pub fn tenant_crawl_pending_key(tenant_id: Uuid) -> String {
    format!("tenant:{tenant_id}:crawl_pending")
}

pub fn feeder_leader_key() -> &'static str {
    "meridian:feeder:leader"
}

pub fn sharepoint_change_key(tenant_id: Uuid, drive_id: &str) -> String {
    format!("meridian:sharepoint:changekey:{tenant_id}:{drive_id}")
}

pub fn audit_config_cache_key(tenant_id: Uuid, category: &str) -> String {
    format!("meridian:audit-config:{tenant_id}:{category}")
}

/// Ephemeral export-job progress record; TTL'd at `expires_at`.
pub fn audit_export_job_key(tenant_id: Uuid, job_id: Uuid) -> String {
    format!("audit_export:{tenant_id}:{job_id}")
}

/// Glob pattern matching every in-flight export job for a tenant, used by
/// the `max_concurrent_exports` guard.
pub fn audit_export_job_scan_pattern(tenant_id: Uuid) -> String {
    format!("audit_export:{tenant_id}:*")
}

/// Short-lived per-tenant/action audit-config resolution cache key.
pub fn audit_action_cache_key(tenant_id: Uuid, action: &str) -> String {
    format!("audit_action:{tenant_id}:{action}")
}

/// Rate-limit bucket for a user's audit-log export/session activity.
pub fn rate_limit_audit_session_key(user_id: Uuid, tenant_id: Uuid) -> String {
    format!("rate_limit:audit_session:{user_id}:{tenant_id}")
}

/// Epoch seconds of the watchdog's last successful sweep, used for
/// external liveness monitoring.
pub fn crawl_watchdog_last_success_key() -> &'static str {
    "crawl_watchdog:last_success_epoch"
}
