//! Postgres-backed [`AuditConfigSource`] over `tenants.audit_enabled` and
//! the per-category `audit_config` table, whose `action_overrides` column
//! holds the action-level map.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{AuditConfigError, AuditConfigSource};

pub struct PgAuditConfigSource {
    pool: PgPool,
}

impl PgAuditConfigSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditConfigSource for PgAuditConfigSource {
    async fn tenant_flag(&self, tenant_id: Uuid) -> Result<Option<bool>, AuditConfigError> {
        let row: Option<(Option<bool>,)> =
            sqlx::query_as("SELECT audit_enabled FROM tenants WHERE id = $1")
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AuditConfigError::Source(e.to_string()))?;
        Ok(row.and_then(|(flag,)| flag))
    }

    async fn category_flag(
        &self,
        tenant_id: Uuid,
        category: &str,
    ) -> Result<Option<bool>, AuditConfigError> {
        let row: Option<(bool,)> = sqlx::query_as(
            "SELECT enabled FROM audit_config WHERE tenant_id = $1 AND category = $2",
        )
        .bind(tenant_id)
        .bind(category)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuditConfigError::Source(e.to_string()))?;
        Ok(row.map(|(enabled,)| enabled))
    }

    async fn action_flag(
        &self,
        tenant_id: Uuid,
        action: &str,
    ) -> Result<Option<bool>, AuditConfigError> {
        let rows: Vec<(Value,)> = sqlx::query_as(
            "SELECT action_overrides FROM audit_config WHERE tenant_id = $1 AND action_overrides ? $2",
        )
        .bind(tenant_id)
        .bind(action)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AuditConfigError::Source(e.to_string()))?;

        Ok(rows
            .into_iter()
            .find_map(|(overrides,)| overrides.get(action).and_then(Value::as_bool)))
    }
}
