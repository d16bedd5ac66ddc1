use async_trait::async_trait;
use uuid::Uuid;

use crate::{Credential, CredentialEnvelope, CredentialError};

/// Raw, still-encrypted storage shape for one tenant's provider
/// credential, as returned by whatever settings store backs
/// `CredentialSource`.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub provider: String,
    pub fields: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct FederationConfig {
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// Supplies the raw tenant-level and platform-level credential rows.
/// `meridian-jobs` or a settings crate implements this against the real
/// store; tests use an in-memory fake.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn tenant_credential(
        &self,
        tenant_id: Uuid,
        provider: &str,
    ) -> Result<Option<StoredCredential>, CredentialError>;

    async fn global_credential(
        &self,
        provider: &str,
    ) -> Result<Option<StoredCredential>, CredentialError>;

    async fn federation_config(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<FederationConfig>, CredentialError>;
}

/// Resolves per-tenant provider credentials, decrypting envelope-sealed
/// fields on the way out.
///
/// `strict_mode` (spec: `tenant_credentials_enabled`) governs what happens
/// when a tenant has no credential of its own for a provider:
/// - strict (multi-tenant) mode: the platform's global credential is never
///   consulted for that tenant/provider pair, full stop.
/// - single-tenant mode: falls back to the platform-wide credential, if one
///   is configured.
pub struct CredentialResolver<S> {
    source: S,
    envelope: CredentialEnvelope,
    strict_mode: bool,
}

impl<S: CredentialSource> CredentialResolver<S> {
    pub fn new(source: S, envelope: CredentialEnvelope, strict_mode: bool) -> Self {
        Self { source, envelope, strict_mode }
    }

    /// `true` if this tenant/provider pair falls back to the platform's
    /// own credential (no tenant override exists, and strict mode is off).
    pub async fn uses_global_credentials(
        &self,
        tenant_id: Uuid,
        provider: &str,
    ) -> Result<bool, CredentialError> {
        if self.strict_mode {
            return Ok(false);
        }
        Ok(self.source.tenant_credential(tenant_id, provider).await?.is_none())
    }

    pub async fn get_api_key(
        &self,
        tenant_id: Uuid,
        provider: &str,
    ) -> Result<String, CredentialError> {
        let tenant = self.source.tenant_credential(tenant_id, provider).await?;

        let stored = match tenant {
            Some(stored) => stored,
            None => {
                if self.strict_mode {
                    return Err(CredentialError::StrictModeNotConfigured {
                        tenant_id,
                        provider: provider.to_string(),
                    });
                }
                self.source
                    .global_credential(provider)
                    .await?
                    .ok_or_else(|| CredentialError::NotConfigured(provider.to_string()))?
            }
        };

        let raw = stored.fields.get("api_key").ok_or_else(|| CredentialError::MissingField {
            provider: provider.to_string(),
            field: "api_key".to_string(),
        })?;
        Ok(self.envelope.open(raw)?)
    }

    /// Resolves a single field of a provider's credential.
    ///
    /// `decrypt` controls whether the stored value is passed through the
    /// credential envelope before being returned (most fields are sealed;
    /// a few, like Azure's endpoint URL, are stored in the clear).
    /// `required` controls whether a missing field is an error or `None`,
    /// but only once a credential record has actually been found — in
    /// strict mode, a tenant with no credential of its own for this
    /// provider always resolves to `None`, regardless of `required`.
    pub async fn get_credential_field(
        &self,
        tenant_id: Uuid,
        provider: &str,
        field: &str,
        fallback: Option<&str>,
        decrypt: bool,
        required: bool,
    ) -> Result<Option<String>, CredentialError> {
        let tenant = self.source.tenant_credential(tenant_id, provider).await?;

        let stored = match tenant {
            Some(stored) => Some(stored),
            None if self.strict_mode => return Ok(None),
            None => self.source.global_credential(provider).await?,
        };

        let Some(stored) = stored else {
            if let Some(fallback) = fallback {
                return Ok(Some(fallback.to_string()));
            }
            if required {
                return Err(CredentialError::NotConfigured(provider.to_string()));
            }
            return Ok(None);
        };

        let Some(raw) = stored.fields.get(field) else {
            if let Some(fallback) = fallback {
                return Ok(Some(fallback.to_string()));
            }
            if required {
                return Err(CredentialError::MissingField {
                    provider: provider.to_string(),
                    field: field.to_string(),
                });
            }
            return Ok(None);
        };

        if decrypt {
            Ok(Some(self.envelope.open(raw)?))
        } else {
            Ok(Some(raw.clone()))
        }
    }

    pub async fn get_federation_config(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<FederationConfig>, CredentialError> {
        self.source.federation_config(tenant_id).await
    }

    pub async fn get_redirect_uri(&self, tenant_id: Uuid) -> Result<Option<String>, CredentialError> {
        Ok(self
            .get_federation_config(tenant_id)
            .await?
            .map(|cfg| cfg.redirect_uri))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeSource {
        tenant: Mutex<HashMap<(Uuid, String), StoredCredential>>,
        global: Mutex<HashMap<String, StoredCredential>>,
    }

    #[async_trait]
    impl CredentialSource for FakeSource {
        async fn tenant_credential(
            &self,
            tenant_id: Uuid,
            provider: &str,
        ) -> Result<Option<StoredCredential>, CredentialError> {
            Ok(self
                .tenant
                .lock()
                .unwrap()
                .get(&(tenant_id, provider.to_string()))
                .cloned())
        }

        async fn global_credential(
            &self,
            provider: &str,
        ) -> Result<Option<StoredCredential>, CredentialError> {
            Ok(self.global.lock().unwrap().get(provider).cloned())
        }

        async fn federation_config(
            &self,
            _tenant_id: Uuid,
        ) -> Result<Option<FederationConfig>, CredentialError> {
            Ok(None)
        }
    }

    fn envelope() -> CredentialEnvelope {
        CredentialEnvelope::new(&[1u8; 32]).unwrap()
    }

    #[tokio::test]
    async fn tenant_credential_takes_priority_over_global() {
        let env = envelope();
        let tenant_id = Uuid::new_v4();
        let mut tenant_fields = HashMap::new();
        tenant_fields.insert("api_key".to_string(), env.seal("tenant-key"));
        let mut global_fields = HashMap::new();
        global_fields.insert("api_key".to_string(), env.seal("global-key"));

        let source = FakeSource {
            tenant: Mutex::new(HashMap::from([(
                (tenant_id, "openai".to_string()),
                StoredCredential {
                    provider: "openai".into(),
                    fields: tenant_fields,
                },
            )])),
            global: Mutex::new(HashMap::from([(
                "openai".to_string(),
                StoredCredential {
                    provider: "openai".into(),
                    fields: global_fields,
                },
            )])),
        };

        let resolver = CredentialResolver::new(source, envelope(), false);
        let key = resolver.get_api_key(tenant_id, "openai").await.unwrap();
        assert_eq!(key, "tenant-key");
        assert!(!resolver.uses_global_credentials(tenant_id, "openai").await.unwrap());
    }

    #[tokio::test]
    async fn falls_back_to_global_when_no_tenant_override() {
        let env = envelope();
        let mut global_fields = HashMap::new();
        global_fields.insert("api_key".to_string(), env.seal("global-key"));

        let source = FakeSource {
            tenant: Mutex::new(HashMap::new()),
            global: Mutex::new(HashMap::from([(
                "openai".to_string(),
                StoredCredential {
                    provider: "openai".into(),
                    fields: global_fields,
                },
            )])),
        };

        let tenant_id = Uuid::new_v4();
        let resolver = CredentialResolver::new(source, envelope(), false);
        assert_eq!(
            resolver.get_api_key(tenant_id, "openai").await.unwrap(),
            "global-key"
        );
        assert!(resolver.uses_global_credentials(tenant_id, "openai").await.unwrap());
    }

    #[tokio::test]
    async fn missing_required_field_errors() {
        let source = FakeSource {
            tenant: Mutex::new(HashMap::new()),
            global: Mutex::new(HashMap::new()),
        };
        let tenant_id = Uuid::new_v4();
        let resolver = CredentialResolver::new(source, envelope(), false);
        let err = resolver.get_api_key(tenant_id, "openai").await.unwrap_err();
        assert!(matches!(err, CredentialError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn strict_mode_never_falls_back_to_global() {
        let env = envelope();
        let mut global_fields = HashMap::new();
        global_fields.insert("api_key".to_string(), env.seal("global-key"));

        let source = FakeSource {
            tenant: Mutex::new(HashMap::new()),
            global: Mutex::new(HashMap::from([(
                "openai".to_string(),
                StoredCredential {
                    provider: "openai".into(),
                    fields: global_fields,
                },
            )])),
        };

        let tenant_id = Uuid::new_v4();
        let resolver = CredentialResolver::new(source, envelope(), true);

        let err = resolver.get_api_key(tenant_id, "openai").await.unwrap_err();
        assert!(matches!(
            err,
            CredentialError::StrictModeNotConfigured { tenant_id: t, ref provider }
                if t == tenant_id && provider == "openai"
        ));
        assert!(!resolver.uses_global_credentials(tenant_id, "openai").await.unwrap());

        let field = resolver
            .get_credential_field(tenant_id, "openai", "api_key", None, true, true)
            .await
            .unwrap();
        assert_eq!(field, None);
    }

    #[tokio::test]
    async fn strict_mode_still_uses_configured_tenant_credential() {
        let env = envelope();
        let mut tenant_fields = HashMap::new();
        tenant_fields.insert("api_key".to_string(), env.seal("tenant-key"));

        let source = FakeSource {
            tenant: Mutex::new(HashMap::from([(
                (Uuid::nil(), "openai".to_string()),
                StoredCredential {
                    provider: "openai".into(),
                    fields: tenant_fields,
                },
            )])),
            global: Mutex::new(HashMap::new()),
        };

        let resolver = CredentialResolver::new(source, envelope(), true);
        let key = resolver.get_api_key(Uuid::nil(), "openai").await.unwrap();
        assert_eq!(key, "tenant-key");
    }
}
