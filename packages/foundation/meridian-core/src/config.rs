use std::env;
use std::time::Duration;

use crate::error::MeridianError;

/// Environment-sourced settings shared across the orchestration core.
///
/// Every field has a production default; nothing here requires a config
/// file. Components read only the fields relevant to them.
#[derive(Debug, Clone)]
pub struct MeridianSettings {
    pub database_url: String,
    pub redis_url: String,

    /// Default per-tenant concurrent crawl slot limit, used when a tenant
    /// has no override in `crawler_settings`.
    pub crawl_default_max_concurrent: u32,
    /// TTL applied to a slot reservation before it is considered orphaned.
    pub crawl_slot_ttl: Duration,
    /// Poll interval for the feeder's promotion loop.
    pub feeder_poll_interval: Duration,
    /// Poll interval for the watchdog's reconciliation sweep.
    pub watchdog_interval: Duration,
    /// A `RUNNING` job that stops heartbeating (`updated_at`) for longer
    /// than this is "long running" and gets failed by watchdog Phase 3.
    pub watchdog_long_running_threshold: Duration,
    /// A job still in `starting`-equivalent state with no crawled pages
    /// past this age is considered stalled (watchdog Phase 3.5).
    pub watchdog_startup_timeout: Duration,
    /// A `QUEUED` job older than this (by `created_at`) is killed outright
    /// by watchdog Phase 1 instead of waiting to be promoted.
    pub crawl_job_max_age: Duration,

    /// Default retention window, in days, used when neither a tenant nor a
    /// global override exists for an entity kind.
    pub retention_default_days: i64,

    /// Hard ceiling on the number of rows an export may stream before it is
    /// rejected with `ExportTooLarge`.
    pub export_memory_limit: usize,
    pub export_stream_batch_size: usize,
    /// Max number of audit exports a single tenant may have in flight at
    /// once (enforced by scanning `audit_export:<tenant>:*` keys).
    pub max_concurrent_exports: usize,

    /// Key used to decrypt/encrypt stored provider credentials
    /// (`enc:<cipher>:<version>:<ciphertext>` envelopes).
    pub credential_encryption_key: Option<String>,

    /// Strict multi-tenant credential isolation: when `true`, a tenant
    /// with no credential of its own for a provider never falls back to
    /// the platform's global credential for that provider.
    pub tenant_credentials_enabled: bool,

    pub oidc_issuer: Option<String>,
    pub oidc_client_id: Option<String>,
    pub oidc_client_secret: Option<String>,
    pub oidc_redirect_uri: Option<String>,
}

impl MeridianSettings {
    /// Loads settings from the process environment, falling back to
    /// production defaults for anything unset.
    pub fn from_env() -> Result<Self, MeridianError> {
        Ok(Self {
            database_url: env_or("MERIDIAN_DATABASE_URL", "postgres://localhost/meridian"),
            redis_url: env_or("MERIDIAN_REDIS_URL", "redis://localhost:6379"),
            crawl_default_max_concurrent: env_parse("MERIDIAN_CRAWL_MAX_CONCURRENT", 5)?,
            crawl_slot_ttl: Duration::from_secs(env_parse("MERIDIAN_CRAWL_SLOT_TTL_SECS", 900)?),
            feeder_poll_interval: Duration::from_secs(env_parse(
                "MERIDIAN_FEEDER_POLL_INTERVAL_SECS",
                5,
            )?),
            watchdog_interval: Duration::from_secs(env_parse(
                "MERIDIAN_WATCHDOG_INTERVAL_SECS",
                60,
            )?),
            watchdog_long_running_threshold: Duration::from_secs(env_parse(
                "MERIDIAN_WATCHDOG_LONG_RUNNING_SECS",
                3600 * 6,
            )?),
            watchdog_startup_timeout: Duration::from_secs(env_parse(
                "MERIDIAN_WATCHDOG_STARTUP_TIMEOUT_SECS",
                300,
            )?),
            crawl_job_max_age: Duration::from_secs(env_parse(
                "MERIDIAN_CRAWL_JOB_MAX_AGE_SECS",
                86_400,
            )?),
            retention_default_days: env_parse("MERIDIAN_RETENTION_DEFAULT_DAYS", 365)?,
            export_memory_limit: env_parse("MERIDIAN_EXPORT_MEMORY_LIMIT", 100_000)?,
            export_stream_batch_size: env_parse("MERIDIAN_EXPORT_STREAM_BATCH_SIZE", 1_000)?,
            max_concurrent_exports: env_parse("MERIDIAN_MAX_CONCURRENT_EXPORTS", 3)?,
            credential_encryption_key: env::var("MERIDIAN_CREDENTIAL_ENCRYPTION_KEY").ok(),
            tenant_credentials_enabled: env_parse("MERIDIAN_TENANT_CREDENTIALS_ENABLED", false)?,
            oidc_issuer: env::var("MERIDIAN_OIDC_ISSUER").ok(),
            oidc_client_id: env::var("MERIDIAN_OIDC_CLIENT_ID").ok(),
            oidc_client_secret: env::var("MERIDIAN_OIDC_CLIENT_SECRET").ok(),
            oidc_redirect_uri: env::var("MERIDIAN_OIDC_REDIRECT_URI").ok(),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T, MeridianError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| MeridianError::Config(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}
