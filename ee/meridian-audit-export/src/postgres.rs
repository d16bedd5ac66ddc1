//! Postgres-backed [`AuditLogSource`] over the append-only `audit_logs`
//! table, filtering and paginating in SQL so a single export never pulls
//! more than one batch into memory at a time.

use async_trait::async_trait;
use meridian_core::{AuditLogEntry, MetadataValue};
use sqlx::PgPool;
use sqlx::Row;
use std::collections::HashMap;

use crate::service::{AuditLogFilter, AuditLogSource, ExportError};

pub struct PgAuditLogSource {
    pool: PgPool,
}

impl PgAuditLogSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn metadata_from_json(value: serde_json::Value) -> HashMap<String, MetadataValue> {
    let Some(object) = value.as_object() else {
        return HashMap::new();
    };
    object
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::from_value(v.clone()).unwrap_or(MetadataValue::Null)))
        .collect()
}

fn build_where(filter: &AuditLogFilter) -> (String, Vec<String>) {
    let mut clauses = vec!["tenant_id = $1".to_string()];
    let mut binds = vec![filter.tenant_id.to_string()];
    if let Some(category) = &filter.category {
        binds.push(category.clone());
        clauses.push(format!("category = ${}", binds.len()));
    }
    if let Some(action) = &filter.action {
        binds.push(action.clone());
        clauses.push(format!("action = ${}", binds.len()));
    }
    if let Some(from) = &filter.from {
        binds.push(from.to_rfc3339());
        clauses.push(format!("created_at >= ${}::timestamptz", binds.len()));
    }
    if let Some(to) = &filter.to {
        binds.push(to.to_rfc3339());
        clauses.push(format!("created_at <= ${}::timestamptz", binds.len()));
    }
    (clauses.join(" AND "), binds)
}

#[async_trait]
impl AuditLogSource for PgAuditLogSource {
    async fn total_count(&self, filter: &AuditLogFilter) -> Result<u64, ExportError> {
        let (where_clause, binds) = build_where(filter);
        let query = format!("SELECT count(*) FROM audit_logs WHERE {where_clause}");
        let mut q = sqlx::query(&query);
        for bind in &binds {
            q = q.bind(bind);
        }
        let row = q
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ExportError::Source(e.to_string()))?;
        let count: i64 = row.try_get(0).map_err(|e| ExportError::Source(e.to_string()))?;
        Ok(count as u64)
    }

    async fn fetch_batch(
        &self,
        filter: &AuditLogFilter,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<AuditLogEntry>, ExportError> {
        let (where_clause, binds) = build_where(filter);
        let query = format!(
            "SELECT id, tenant_id, actor, actor_type, action, category, resource_type, \
             resource_id, description, outcome, error_message, metadata, created_at \
             FROM audit_logs WHERE {where_clause} \
             ORDER BY created_at, id LIMIT {limit} OFFSET {offset}"
        );
        let mut q = sqlx::query(&query);
        for bind in &binds {
            q = q.bind(bind);
        }
        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ExportError::Source(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                Ok(AuditLogEntry {
                    id: row.try_get("id").map_err(|e| ExportError::Source(e.to_string()))?,
                    tenant_id: row
                        .try_get("tenant_id")
                        .map_err(|e| ExportError::Source(e.to_string()))?,
                    actor: row.try_get("actor").map_err(|e| ExportError::Source(e.to_string()))?,
                    actor_type: row
                        .try_get("actor_type")
                        .map_err(|e| ExportError::Source(e.to_string()))?,
                    action: row.try_get("action").map_err(|e| ExportError::Source(e.to_string()))?,
                    category: row
                        .try_get("category")
                        .map_err(|e| ExportError::Source(e.to_string()))?,
                    resource_type: row
                        .try_get("resource_type")
                        .map_err(|e| ExportError::Source(e.to_string()))?,
                    resource_id: row
                        .try_get("resource_id")
                        .map_err(|e| ExportError::Source(e.to_string()))?,
                    description: row
                        .try_get("description")
                        .map_err(|e| ExportError::Source(e.to_string()))?,
                    outcome: row
                        .try_get("outcome")
                        .map_err(|e| ExportError::Source(e.to_string()))?,
                    error_message: row
                        .try_get("error_message")
                        .map_err(|e| ExportError::Source(e.to_string()))?,
                    metadata: metadata_from_json(
                        row.try_get("metadata")
                            .map_err(|e| ExportError::Source(e.to_string()))?,
                    ),
                    created_at: row
                        .try_get("created_at")
                        .map_err(|e| ExportError::Source(e.to_string()))?,
                })
            })
            .collect()
    }
}
