//! API key issuance policy: key taxonomy, origin/IP guardrails and rate
//! limit bounds.
//!
//! Keys come in two kinds — publishable (`pk_`, safe to ship to a browser,
//! origin-restricted) and secret (`sk_`, server-to-server, IP-restricted).
//! The policy service only decides whether a request to create, update or
//! use a key is allowed; storage and hashing of the key material live with
//! the caller.

mod ip;
mod origin;

pub use ip::ip_allowed;
pub use origin::{origin_allowed, resolve_client_ip};

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyKind {
    /// `pk_...` — embeddable client-side, restricted by allowed origins.
    Publishable,
    /// `sk_...` — server-to-server, restricted by allowed IPs/CIDRs.
    Secret,
}

impl ApiKeyKind {
    pub fn prefix(self) -> &'static str {
        match self {
            ApiKeyKind::Publishable => "pk_",
            ApiKeyKind::Secret => "sk_",
        }
    }
}

/// The access level a resource-scoped request requires, or that a key's
/// `resource_permissions` map grants for a given resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceLevel {
    Read,
    Write,
    Admin,
}

/// Maps an HTTP method to the resource level it requires. `is_read_override`
/// covers endpoints that are POST but semantically read-only (e.g.
/// token-estimation). Unrecognized methods fail closed to `Admin`.
pub fn required_level_for_method(method: &str, is_read_override: bool) -> ResourceLevel {
    if is_read_override {
        return ResourceLevel::Read;
    }
    match method.to_ascii_uppercase().as_str() {
        "GET" | "HEAD" | "OPTIONS" => ResourceLevel::Read,
        "POST" | "PATCH" | "PUT" => ResourceLevel::Write,
        "DELETE" => ResourceLevel::Admin,
        _ => ResourceLevel::Admin,
    }
}

/// Context describing exactly what was denied, surfaced so the caller can
/// emit an `API_KEY_AUTH_FAILED` audit event alongside the error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenialContext {
    pub resource_type: String,
    pub required_level: ResourceLevel,
    pub granted_level: Option<ResourceLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub kind: ApiKeyKind,
    pub allowed_origins: Vec<String>,
    pub allowed_ips: Vec<String>,
    pub rate_limit_per_minute: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_by: String,
    /// Per-resource-type access grants (`apps`, `assistants`, `groups`, …).
    /// Absence of an entry denies access to that resource type entirely.
    pub resource_permissions: HashMap<String, ResourceLevel>,
}

#[derive(Debug, Clone)]
pub struct ApiKeyCreateRequest {
    pub kind: ApiKeyKind,
    pub allowed_origins: Vec<String>,
    pub allowed_ips: Vec<String>,
    pub rate_limit_per_minute: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiKeyPolicyError {
    #[error("actor is not authorized to create API keys for this tenant")]
    CreatorNotAuthorized,
    #[error("actor is not authorized to manage this API key")]
    ManagerNotAuthorized,
    #[error("requested origin '{0}' is not a subset of the tenant's allowed origin patterns")]
    OriginNotAllowed(String),
    #[error("requested origin '{0}' has no scheme")]
    OriginMissingScheme(String),
    #[error("requested IP/CIDR '{0}' is invalid")]
    InvalidIpEntry(String),
    #[error("rate limit {0} exceeds the tenant's maximum of {1}")]
    RateLimitTooHigh(u32, u32),
    #[error("expiration must be in the future")]
    ExpirationInPast,
    #[error("API key has been revoked")]
    KeyRevoked,
    #[error("API key has expired")]
    KeyExpired,
    #[error("request origin '{0}' is not in this key's allowed origins")]
    RequestOriginDenied(String),
    #[error("request IP '{0}' is not in this key's allowed IPs")]
    RequestIpDenied(String),
    #[error("insufficient permission on resource '{}'", .0.resource_type)]
    InsufficientPermission(DenialContext),
}

pub const DEFAULT_MAX_RATE_LIMIT_PER_MINUTE: u32 = 6000;
const ORIGIN_CACHE_TTL: Duration = Duration::from_secs(300);

/// Who is attempting the operation, for authorization checks independent
/// of the key-scoped guardrails above.
pub struct Actor {
    pub user_id: String,
    pub tenant_id: Uuid,
    pub is_tenant_admin: bool,
}

/// Supplies the set of origin glob patterns ("https://*.example.com") a
/// tenant has registered, with a short TTL cache so validating many keys
/// in a row does not repeatedly hit the tenant settings store.
pub trait TenantOriginPatterns: Send + Sync {
    fn patterns_for(&self, tenant_id: Uuid) -> Vec<String>;
}

pub struct CachingOriginPatterns<S> {
    source: S,
    cache: RwLock<HashMap<Uuid, (Vec<String>, Instant)>>,
}

impl<S: TenantOriginPatterns> CachingOriginPatterns<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, tenant_id: Uuid) -> Vec<String> {
        if let Some((patterns, fetched_at)) = self.cache.read().get(&tenant_id) {
            if fetched_at.elapsed() < ORIGIN_CACHE_TTL {
                return patterns.clone();
            }
        }
        let patterns = self.source.patterns_for(tenant_id);
        self.cache
            .write()
            .insert(tenant_id, (patterns.clone(), Instant::now()));
        patterns
    }

    /// Invalidates the cached pattern set for a tenant, e.g. right after an
    /// admin updates the tenant's registered origins.
    pub fn invalidate(&self, tenant_id: Uuid) {
        self.cache.write().remove(&tenant_id);
    }
}

pub struct ApiKeyPolicyService<S> {
    origin_patterns: CachingOriginPatterns<S>,
    max_rate_limit_per_minute: u32,
}

impl<S: TenantOriginPatterns> ApiKeyPolicyService<S> {
    pub fn new(origin_source: S) -> Self {
        Self {
            origin_patterns: CachingOriginPatterns::new(origin_source),
            max_rate_limit_per_minute: DEFAULT_MAX_RATE_LIMIT_PER_MINUTE,
        }
    }

    pub fn invalidate_tenant_origin_cache(&self, tenant_id: Uuid) {
        self.origin_patterns.invalidate(tenant_id);
    }

    pub fn ensure_creator_authorized(&self, actor: &Actor) -> Result<(), ApiKeyPolicyError> {
        if actor.is_tenant_admin {
            Ok(())
        } else {
            Err(ApiKeyPolicyError::CreatorNotAuthorized)
        }
    }

    pub fn ensure_manage_authorized(&self, actor: &Actor) -> Result<(), ApiKeyPolicyError> {
        self.ensure_creator_authorized(actor)
            .map_err(|_| ApiKeyPolicyError::ManagerNotAuthorized)
    }

    /// Full validation for a create/update request: expiration, rate
    /// limit ceiling, well-formed IP entries, and that every requested
    /// origin is a subset of the tenant's registered patterns.
    pub fn validate_create_request(
        &self,
        tenant_id: Uuid,
        request: &ApiKeyCreateRequest,
    ) -> Result<(), ApiKeyPolicyError> {
        self.validate_expiration(request.expires_at)?;
        self.validate_rate_limit(request.rate_limit_per_minute)?;
        for ip in &request.allowed_ips {
            self.validate_ip_entry(ip)?;
        }
        self.validate_allowed_origins_subset(tenant_id, &request.allowed_origins)?;
        Ok(())
    }

    pub fn validate_allowed_origins_subset(
        &self,
        tenant_id: Uuid,
        requested: &[String],
    ) -> Result<(), ApiKeyPolicyError> {
        let patterns = self.origin_patterns.get(tenant_id);
        for origin in requested {
            self.validate_origin(origin)?;
            if !origin::matches_any_pattern(origin, &patterns) {
                return Err(ApiKeyPolicyError::OriginNotAllowed(origin.clone()));
            }
        }
        Ok(())
    }

    fn validate_origin(&self, origin: &str) -> Result<(), ApiKeyPolicyError> {
        if !origin::has_scheme(origin) {
            return Err(ApiKeyPolicyError::OriginMissingScheme(origin.to_string()));
        }
        Ok(())
    }

    fn validate_ip_entry(&self, entry: &str) -> Result<(), ApiKeyPolicyError> {
        if ip::parse_cidr(entry).is_none() {
            return Err(ApiKeyPolicyError::InvalidIpEntry(entry.to_string()));
        }
        Ok(())
    }

    fn validate_rate_limit(&self, requested: Option<u32>) -> Result<(), ApiKeyPolicyError> {
        match requested {
            Some(limit) if limit > self.max_rate_limit_per_minute => Err(
                ApiKeyPolicyError::RateLimitTooHigh(limit, self.max_rate_limit_per_minute),
            ),
            _ => Ok(()),
        }
    }

    fn validate_expiration(
        &self,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), ApiKeyPolicyError> {
        match expires_at {
            Some(t) if t <= Utc::now() => Err(ApiKeyPolicyError::ExpirationInPast),
            _ => Ok(()),
        }
    }

    pub fn validate_key_state(&self, key: &ApiKeyRecord) -> Result<(), ApiKeyPolicyError> {
        if key.revoked_at.is_some() {
            return Err(ApiKeyPolicyError::KeyRevoked);
        }
        if let Some(expires_at) = key.expires_at {
            if expires_at <= Utc::now() {
                return Err(ApiKeyPolicyError::KeyExpired);
            }
        }
        Ok(())
    }

    /// Enforces the per-request guardrails for an already-validated key:
    /// state (revoked/expired), then origin (publishable keys) or IP
    /// (secret keys), whichever applies to `key.kind`.
    pub fn enforce_guardrails(
        &self,
        key: &ApiKeyRecord,
        request_origin: Option<&str>,
        request_ip: Option<std::net::IpAddr>,
    ) -> Result<(), ApiKeyPolicyError> {
        self.validate_key_state(key)?;

        match key.kind {
            ApiKeyKind::Publishable => {
                if key.allowed_origins.is_empty() {
                    return Ok(());
                }
                let origin = request_origin.unwrap_or("");
                if !origin::matches_any_pattern(origin, &key.allowed_origins)
                    && !origin::is_localhost_origin(origin)
                {
                    return Err(ApiKeyPolicyError::RequestOriginDenied(origin.to_string()));
                }
            }
            ApiKeyKind::Secret => {
                if key.allowed_ips.is_empty() {
                    return Ok(());
                }
                match request_ip {
                    Some(ip) if ip::ip_allowed(ip, &key.allowed_ips) => {}
                    Some(ip) => return Err(ApiKeyPolicyError::RequestIpDenied(ip.to_string())),
                    None => {
                        return Err(ApiKeyPolicyError::RequestIpDenied("unknown".to_string()))
                    }
                }
            }
        }
        Ok(())
    }

    /// Method-aware resource guard: GET/HEAD/OPTIONS need `Read`, POST/
    /// PATCH/PUT need `Write` (unless `is_read_override`), DELETE and any
    /// unrecognized method need `Admin`. Returns the denial context on
    /// failure so the caller can emit `API_KEY_AUTH_FAILED` with it.
    pub fn check_resource_permission(
        &self,
        key: &ApiKeyRecord,
        resource_type: &str,
        method: &str,
        is_read_override: bool,
    ) -> Result<(), ApiKeyPolicyError> {
        let required = required_level_for_method(method, is_read_override);
        let granted = key.resource_permissions.get(resource_type).copied();
        match granted {
            Some(level) if level >= required => Ok(()),
            _ => Err(ApiKeyPolicyError::InsufficientPermission(DenialContext {
                resource_type: resource_type.to_string(),
                required_level: required,
                granted_level: granted,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPatterns(Vec<String>);
    impl TenantOriginPatterns for FixedPatterns {
        fn patterns_for(&self, _tenant_id: Uuid) -> Vec<String> {
            self.0.clone()
        }
    }

    fn service() -> ApiKeyPolicyService<FixedPatterns> {
        ApiKeyPolicyService::new(FixedPatterns(vec!["https://*.example.com".into()]))
    }

    #[test]
    fn rejects_origin_outside_tenant_patterns() {
        let svc = service();
        let err = svc
            .validate_allowed_origins_subset(Uuid::new_v4(), &["https://evil.com".into()])
            .unwrap_err();
        assert_eq!(err, ApiKeyPolicyError::OriginNotAllowed("https://evil.com".into()));
    }

    #[test]
    fn accepts_origin_matching_wildcard_pattern() {
        let svc = service();
        svc.validate_allowed_origins_subset(Uuid::new_v4(), &["https://app.example.com".into()])
            .unwrap();
    }

    #[test]
    fn rejects_rate_limit_above_ceiling() {
        let svc = service();
        let err = svc.validate_rate_limit(Some(99_999)).unwrap_err();
        assert_eq!(
            err,
            ApiKeyPolicyError::RateLimitTooHigh(99_999, DEFAULT_MAX_RATE_LIMIT_PER_MINUTE)
        );
    }

    #[test]
    fn rejects_past_expiration() {
        let svc = service();
        let err = svc
            .validate_expiration(Some(Utc::now() - chrono::Duration::days(1)))
            .unwrap_err();
        assert_eq!(err, ApiKeyPolicyError::ExpirationInPast);
    }

    #[test]
    fn secret_key_enforces_ip_allowlist() {
        let svc = service();
        let key = ApiKeyRecord {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            kind: ApiKeyKind::Secret,
            allowed_origins: vec![],
            allowed_ips: vec!["10.0.0.0/8".into()],
            rate_limit_per_minute: None,
            expires_at: None,
            revoked_at: None,
            created_by: "admin".into(),
            resource_permissions: HashMap::new(),
        };
        assert!(svc
            .enforce_guardrails(&key, None, Some("10.1.2.3".parse().unwrap()))
            .is_ok());
        assert!(svc
            .enforce_guardrails(&key, None, Some("8.8.8.8".parse().unwrap()))
            .is_err());
    }

    #[test]
    fn revoked_key_fails_state_check() {
        let svc = service();
        let key = ApiKeyRecord {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            kind: ApiKeyKind::Publishable,
            allowed_origins: vec![],
            allowed_ips: vec![],
            rate_limit_per_minute: None,
            expires_at: None,
            revoked_at: Some(Utc::now()),
            created_by: "admin".into(),
            resource_permissions: HashMap::new(),
        };
        assert_eq!(
            svc.validate_key_state(&key).unwrap_err(),
            ApiKeyPolicyError::KeyRevoked
        );
    }

    #[test]
    fn required_level_follows_http_method() {
        assert_eq!(required_level_for_method("GET", false), ResourceLevel::Read);
        assert_eq!(required_level_for_method("HEAD", false), ResourceLevel::Read);
        assert_eq!(required_level_for_method("POST", false), ResourceLevel::Write);
        assert_eq!(required_level_for_method("PATCH", false), ResourceLevel::Write);
        assert_eq!(required_level_for_method("DELETE", false), ResourceLevel::Admin);
        assert_eq!(required_level_for_method("TRACE", false), ResourceLevel::Admin);
    }

    #[test]
    fn read_override_downgrades_post_to_read() {
        assert_eq!(required_level_for_method("POST", true), ResourceLevel::Read);
    }

    fn key_with_permissions(perms: &[(&str, ResourceLevel)]) -> ApiKeyRecord {
        ApiKeyRecord {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            kind: ApiKeyKind::Secret,
            allowed_origins: vec![],
            allowed_ips: vec![],
            rate_limit_per_minute: None,
            expires_at: None,
            revoked_at: None,
            created_by: "admin".into(),
            resource_permissions: perms
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        }
    }

    #[test]
    fn grants_access_when_permission_meets_required_level() {
        let svc = service();
        let key = key_with_permissions(&[("apps", ResourceLevel::Write)]);
        assert!(svc.check_resource_permission(&key, "apps", "POST", false).is_ok());
        assert!(svc.check_resource_permission(&key, "apps", "GET", false).is_ok());
    }

    #[test]
    fn denies_write_when_only_read_granted() {
        let svc = service();
        let key = key_with_permissions(&[("apps", ResourceLevel::Read)]);
        let err = svc
            .check_resource_permission(&key, "apps", "DELETE", false)
            .unwrap_err();
        assert_eq!(
            err,
            ApiKeyPolicyError::InsufficientPermission(DenialContext {
                resource_type: "apps".into(),
                required_level: ResourceLevel::Admin,
                granted_level: Some(ResourceLevel::Read),
            })
        );
    }

    #[test]
    fn denies_with_no_granted_level_when_resource_missing() {
        let svc = service();
        let key = key_with_permissions(&[]);
        let err = svc
            .check_resource_permission(&key, "assistants", "GET", false)
            .unwrap_err();
        assert_eq!(
            err,
            ApiKeyPolicyError::InsufficientPermission(DenialContext {
                resource_type: "assistants".into(),
                required_level: ResourceLevel::Read,
                granted_level: None,
            })
        );
    }

    #[test]
    fn read_override_allows_post_with_only_read_permission() {
        let svc = service();
        let key = key_with_permissions(&[("assistants", ResourceLevel::Read)]);
        assert!(svc
            .check_resource_permission(&key, "assistants", "POST", true)
            .is_ok());
    }
}
