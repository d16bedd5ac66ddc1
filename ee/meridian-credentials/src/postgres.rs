//! Postgres-backed [`CredentialSource`], reading the JSON blobs `tenants`
//! stores per spec: `api_credentials` keyed by provider, `federation_config`
//! for the tenant's OIDC settings. The platform-wide fallback lives in a
//! single `platform_credentials` row per provider.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::resolver::{CredentialSource, FederationConfig, StoredCredential};
use crate::CredentialError;

pub struct PgCredentialSource {
    pool: PgPool,
}

impl PgCredentialSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn fields_from_json(provider: &str, value: &Value) -> Option<StoredCredential> {
    let fields = value.get(provider)?.as_object()?;
    Some(StoredCredential {
        provider: provider.to_string(),
        fields: fields
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect(),
    })
}

#[async_trait]
impl CredentialSource for PgCredentialSource {
    async fn tenant_credential(
        &self,
        tenant_id: Uuid,
        provider: &str,
    ) -> Result<Option<StoredCredential>, CredentialError> {
        let row: Option<(Value,)> =
            sqlx::query_as("SELECT api_credentials FROM tenants WHERE id = $1")
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| CredentialError::Source(e.to_string()))?;
        Ok(row.and_then(|(creds,)| fields_from_json(provider, &creds)))
    }

    async fn global_credential(
        &self,
        provider: &str,
    ) -> Result<Option<StoredCredential>, CredentialError> {
        let row: Option<(String, Value)> = sqlx::query_as(
            "SELECT provider, fields FROM platform_credentials WHERE provider = $1",
        )
        .bind(provider)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CredentialError::Source(e.to_string()))?;

        Ok(row.and_then(|(provider, fields)| {
            let fields = fields.as_object()?;
            Some(StoredCredential {
                provider,
                fields: fields
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect(),
            })
        }))
    }

    async fn federation_config(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<FederationConfig>, CredentialError> {
        let row: Option<(Value,)> =
            sqlx::query_as("SELECT federation_config FROM tenants WHERE id = $1")
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| CredentialError::Source(e.to_string()))?;

        Ok(row.and_then(|(cfg,)| {
            if cfg.is_null() {
                return None;
            }
            Some(FederationConfig {
                issuer: cfg.get("issuer")?.as_str()?.to_string(),
                client_id: cfg.get("client_id")?.as_str()?.to_string(),
                client_secret: cfg.get("client_secret")?.as_str()?.to_string(),
                redirect_uri: cfg.get("redirect_uri")?.as_str()?.to_string(),
            })
        }))
    }
}
