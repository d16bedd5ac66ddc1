//! Data retention sweeps.
//!
//! Two independent retention models live here. Audit log retention is a
//! flat COALESCE: tenant override, else global default, else a
//! compiled-in fallback, all expressed in Rust against `RetentionPolicy`
//! rows loaded from `audit_retention_policy`. Conversation history
//! (Questions, AppRuns) instead resolves leaf-first through the
//! Assistant/App and Space a row belongs to, down to the Tenant, and
//! that COALESCE is pushed into SQL since all three levels live in the
//! same join.

use meridian_core::RetentionPolicy;
use sqlx::PgPool;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Flat, tenant-override-else-global entity kinds. Jobs are never
/// deleted, and nothing in the relational schema grounds a retention
/// policy for crawl runs, so audit logs are the only member.
const ENTITY_KINDS: &[(&str, &str)] = &[("audit_log", "audit_logs")];

#[derive(Debug, Default, Clone, Copy)]
pub struct RetentionSweepResult {
    pub rows_deleted: u64,
}

pub struct DataRetentionService {
    pool: PgPool,
    default_days: i64,
}

impl DataRetentionService {
    pub fn new(pool: PgPool, default_days: i64) -> Self {
        Self { pool, default_days }
    }

    /// Resolves the retention window for one (tenant, entity_kind) pair:
    /// tenant override, else global default, else the compiled-in
    /// fallback.
    pub fn resolve_window(
        &self,
        tenant_id: Uuid,
        entity_kind: &str,
        policies: &[RetentionPolicy],
    ) -> i64 {
        resolve_window(tenant_id, entity_kind, policies, self.default_days)
    }

    /// Runs the flat audit-log sweep for every tenant, using whatever
    /// policies are passed in (the caller loads them once up front so the
    /// sweep itself does not re-query the policy table per tenant).
    pub async fn run_sweep(
        &self,
        tenant_ids: &[Uuid],
        policies: &[RetentionPolicy],
    ) -> Result<HashMap<(Uuid, &'static str), RetentionSweepResult>, RetentionError> {
        let mut results = HashMap::new();
        for &tenant_id in tenant_ids {
            for &(entity_kind, table) in ENTITY_KINDS {
                let retention_days = self.resolve_window(tenant_id, entity_kind, policies);
                let deleted = self.delete_expired(table, tenant_id, retention_days).await?;
                tracing::info!(
                    %tenant_id,
                    entity_kind,
                    retention_days,
                    deleted,
                    "retention sweep deleted rows"
                );
                results.insert((tenant_id, entity_kind), RetentionSweepResult { rows_deleted: deleted });
            }
        }
        Ok(results)
    }

    async fn delete_expired(
        &self,
        table: &str,
        tenant_id: Uuid,
        retention_days: i64,
    ) -> Result<u64, RetentionError> {
        let query = format!(
            "DELETE FROM {table} WHERE tenant_id = $1 AND created_at < now() - ($2 || ' days')::interval"
        );
        let result = sqlx::query(&query)
            .bind(tenant_id)
            .bind(retention_days.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Runs the hierarchical conversation-history sweep (Questions and
    /// AppRuns) for every tenant. Unlike the audit-log sweep this needs no
    /// pre-loaded policy table: the effective window is resolved per row,
    /// in SQL, from the assistant/app, space and tenant chain that row
    /// belongs to.
    pub async fn run_hierarchical_sweep(
        &self,
        tenant_ids: &[Uuid],
    ) -> Result<HashMap<(Uuid, &'static str), RetentionSweepResult>, RetentionError> {
        let mut results = HashMap::new();
        for &tenant_id in tenant_ids {
            let questions = self.delete_old_questions(tenant_id).await?;
            tracing::info!(%tenant_id, deleted = questions, "question retention sweep deleted rows");
            results.insert((tenant_id, "question"), RetentionSweepResult { rows_deleted: questions });

            let app_runs = self.delete_old_app_runs(tenant_id).await?;
            tracing::info!(%tenant_id, deleted = app_runs, "app_run retention sweep deleted rows");
            results.insert((tenant_id, "app_run"), RetentionSweepResult { rows_deleted: app_runs });
        }
        Ok(results)
    }

    /// Deletes Questions whose effective retention window has elapsed.
    /// `effective_retention_days` resolves leaf-first: assistant override,
    /// else space override, else the tenant's conversation retention
    /// (only when `conversation_retention_enabled`), else NULL (kept
    /// forever — NULL propagates through the interval comparison, so the
    /// row never matches and needs no separate `IS NOT NULL` guard).
    async fn delete_old_questions(&self, tenant_id: Uuid) -> Result<u64, RetentionError> {
        let result = sqlx::query(
            "DELETE FROM questions q \
             USING assistants a, spaces s, tenants t \
             WHERE q.assistant_id = a.id \
               AND a.space_id = s.id \
               AND s.tenant_id = t.id \
               AND t.id = $1 \
               AND q.created_at < now() - ( \
                     COALESCE( \
                         a.data_retention_days, \
                         s.data_retention_days, \
                         CASE WHEN t.conversation_retention_enabled THEN t.conversation_retention_days ELSE NULL END \
                     ) || ' days' \
                   )::interval",
        )
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Same resolution as [`Self::delete_old_questions`], but for AppRuns,
    /// whose leaf override comes from the owning App rather than an
    /// Assistant.
    async fn delete_old_app_runs(&self, tenant_id: Uuid) -> Result<u64, RetentionError> {
        let result = sqlx::query(
            "DELETE FROM app_runs r \
             USING apps p, spaces s, tenants t \
             WHERE r.app_id = p.id \
               AND p.space_id = s.id \
               AND s.tenant_id = t.id \
               AND t.id = $1 \
               AND r.created_at < now() - ( \
                     COALESCE( \
                         p.data_retention_days, \
                         s.data_retention_days, \
                         CASE WHEN t.conversation_retention_enabled THEN t.conversation_retention_days ELSE NULL END \
                     ) || ' days' \
                   )::interval",
        )
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn resolve_window(
    tenant_id: Uuid,
    entity_kind: &str,
    policies: &[RetentionPolicy],
    default_days: i64,
) -> i64 {
    policies
        .iter()
        .find(|p| p.tenant_id == Some(tenant_id) && p.entity_kind == entity_kind)
        .or_else(|| {
            policies
                .iter()
                .find(|p| p.tenant_id.is_none() && p.entity_kind == entity_kind)
        })
        .map(|p| p.retention_days)
        .unwrap_or(default_days)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(tenant_id: Option<Uuid>, entity_kind: &str, days: i64) -> RetentionPolicy {
        RetentionPolicy {
            tenant_id,
            entity_kind: entity_kind.to_string(),
            retention_days: days,
        }
    }

    #[test]
    fn tenant_override_wins_over_global_default() {
        let tenant_id = Uuid::new_v4();
        let policies = vec![
            policy(None, "audit_log", 180),
            policy(Some(tenant_id), "audit_log", 30),
        ];
        assert_eq!(resolve_window(tenant_id, "audit_log", &policies, 365), 30);
    }

    #[test]
    fn global_default_wins_over_hardcoded_fallback() {
        let tenant_id = Uuid::new_v4();
        let policies = vec![policy(None, "audit_log", 180)];
        assert_eq!(resolve_window(tenant_id, "audit_log", &policies, 365), 180);
    }

    #[test]
    fn falls_back_to_hardcoded_default_with_no_policies() {
        let tenant_id = Uuid::new_v4();
        assert_eq!(resolve_window(tenant_id, "audit_log", &[], 365), 365);
    }

    #[test]
    fn only_audit_log_uses_flat_resolution() {
        assert_eq!(ENTITY_KINDS.len(), 1);
        assert_eq!(ENTITY_KINDS[0].0, "audit_log");
    }
}
