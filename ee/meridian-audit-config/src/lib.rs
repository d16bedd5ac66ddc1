//! Resolves whether an audit action should be logged at all, cached with a
//! short TTL since this check runs on the hot path of every audited
//! operation.
//!
//! Resolution order, most specific wins: an explicit action-level flag,
//! else a category-level flag, else the tenant's blanket flag, else the
//! platform default (`true` — audit logging is opt-out, not opt-in).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

mod postgres;
pub use postgres::PgAuditConfigSource;

#[derive(Debug, Error)]
pub enum AuditConfigError {
    #[error("source error: {0}")]
    Source(String),
}

/// Supplies the three override levels. `None` at any level means "no
/// override configured here", not "disabled".
#[async_trait]
pub trait AuditConfigSource: Send + Sync {
    async fn tenant_flag(&self, tenant_id: Uuid) -> Result<Option<bool>, AuditConfigError>;
    async fn category_flag(
        &self,
        tenant_id: Uuid,
        category: &str,
    ) -> Result<Option<bool>, AuditConfigError>;
    async fn action_flag(
        &self,
        tenant_id: Uuid,
        action: &str,
    ) -> Result<Option<bool>, AuditConfigError>;
}

#[derive(Hash, Eq, PartialEq, Clone)]
enum CacheKey {
    Category(Uuid, String),
    Action(Uuid, String),
}

pub struct AuditConfigService<S> {
    source: S,
    cache: DashMap<CacheKey, (bool, Instant)>,
    ttl: Duration,
}

impl<S: AuditConfigSource> AuditConfigService<S> {
    pub fn new(source: S, ttl: Duration) -> Self {
        Self {
            source,
            cache: DashMap::new(),
            ttl,
        }
    }

    pub async fn is_enabled(
        &self,
        tenant_id: Uuid,
        category: &str,
        action: &str,
    ) -> Result<bool, AuditConfigError> {
        if let Some(flag) = self
            .cached_or_fetch(CacheKey::Action(tenant_id, action.to_string()), || {
                self.source.action_flag(tenant_id, action)
            })
            .await?
        {
            return Ok(flag);
        }

        if let Some(flag) = self
            .cached_or_fetch(CacheKey::Category(tenant_id, category.to_string()), || {
                self.source.category_flag(tenant_id, category)
            })
            .await?
        {
            return Ok(flag);
        }

        Ok(self.source.tenant_flag(tenant_id).await?.unwrap_or(true))
    }

    async fn cached_or_fetch<Fut>(
        &self,
        key: CacheKey,
        fetch: impl FnOnce() -> Fut,
    ) -> Result<Option<bool>, AuditConfigError>
    where
        Fut: std::future::Future<Output = Result<Option<bool>, AuditConfigError>>,
    {
        if let Some(entry) = self.cache.get(&key) {
            let (flag, fetched_at) = *entry;
            if fetched_at.elapsed() < self.ttl {
                return Ok(Some(flag));
            }
        }

        match fetch().await? {
            Some(flag) => {
                self.cache.insert(key, (flag, Instant::now()));
                Ok(Some(flag))
            }
            None => Ok(None),
        }
    }

    /// Drops every cached entry for a tenant, used right after an admin
    /// changes that tenant's audit configuration.
    pub fn invalidate_tenant(&self, tenant_id: Uuid) {
        self.cache.retain(|key, _| match key {
            CacheKey::Category(id, _) | CacheKey::Action(id, _) => *id != tenant_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        tenant: Option<bool>,
        category: Option<bool>,
        action: Option<bool>,
        action_calls: AtomicUsize,
    }

    #[async_trait]
    impl AuditConfigSource for FakeSource {
        async fn tenant_flag(&self, _tenant_id: Uuid) -> Result<Option<bool>, AuditConfigError> {
            Ok(self.tenant)
        }
        async fn category_flag(
            &self,
            _tenant_id: Uuid,
            _category: &str,
        ) -> Result<Option<bool>, AuditConfigError> {
            Ok(self.category)
        }
        async fn action_flag(
            &self,
            _tenant_id: Uuid,
            _action: &str,
        ) -> Result<Option<bool>, AuditConfigError> {
            self.action_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.action)
        }
    }

    #[tokio::test]
    async fn action_override_wins_over_category_and_tenant() {
        let source = FakeSource {
            tenant: Some(false),
            category: Some(false),
            action: Some(true),
            action_calls: AtomicUsize::new(0),
        };
        let service = AuditConfigService::new(source, Duration::from_secs(60));
        let tenant_id = Uuid::new_v4();
        assert!(service.is_enabled(tenant_id, "crawl", "export").await.unwrap());
    }

    #[tokio::test]
    async fn falls_back_to_default_true_with_no_overrides() {
        let source = FakeSource {
            tenant: None,
            category: None,
            action: None,
            action_calls: AtomicUsize::new(0),
        };
        let service = AuditConfigService::new(source, Duration::from_secs(60));
        let tenant_id = Uuid::new_v4();
        assert!(service.is_enabled(tenant_id, "crawl", "export").await.unwrap());
    }

    #[tokio::test]
    async fn result_is_cached_within_ttl() {
        let source = FakeSource {
            tenant: Some(true),
            category: None,
            action: Some(false),
            action_calls: AtomicUsize::new(0),
        };
        let service = AuditConfigService::new(source, Duration::from_secs(60));
        let tenant_id = Uuid::new_v4();
        service.is_enabled(tenant_id, "crawl", "export").await.unwrap();
        service.is_enabled(tenant_id, "crawl", "export").await.unwrap();
        assert_eq!(service.source.action_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_tenant_clears_cache() {
        let source = FakeSource {
            tenant: Some(true),
            category: None,
            action: Some(false),
            action_calls: AtomicUsize::new(0),
        };
        let service = AuditConfigService::new(source, Duration::from_secs(60));
        let tenant_id = Uuid::new_v4();
        service.is_enabled(tenant_id, "crawl", "export").await.unwrap();
        service.invalidate_tenant(tenant_id);
        service.is_enabled(tenant_id, "crawl", "export").await.unwrap();
        assert_eq!(service.source.action_calls.load(Ordering::SeqCst), 2);
    }
}
