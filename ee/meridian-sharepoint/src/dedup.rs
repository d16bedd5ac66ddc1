use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("coordinator error: {0}")]
    Coordinator(String),
}

/// Tracks which `ChangeKey` values have already been processed per
/// (tenant, drive), so a redelivered notification never double-queues a
/// sync job.
#[async_trait]
pub trait ChangeKeyStore: Send + Sync {
    /// Records `change_key` as seen. Returns `true` if this call is the one
    /// that recorded it (first delivery), `false` if it was already
    /// present (duplicate).
    async fn record_if_new(
        &self,
        tenant_id: Uuid,
        drive_id: &str,
        change_key: &str,
    ) -> Result<bool, DedupError>;
}

const RECORD_SCRIPT: &str = r#"
local key = KEYS[1]
local change_key = ARGV[1]
local ttl = ARGV[2]
if redis.call('SISMEMBER', key, change_key) == 1 then
    return 0
end
redis.call('SADD', key, change_key)
redis.call('EXPIRE', key, ttl)
return 1
"#;

pub struct RedisChangeKeyStore {
    client: redis::Client,
    ttl_seconds: u64,
}

impl RedisChangeKeyStore {
    pub fn new(redis_url: &str, ttl_seconds: u64) -> Result<Self, redis::RedisError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            ttl_seconds,
        })
    }
}

#[async_trait]
impl ChangeKeyStore for RedisChangeKeyStore {
    async fn record_if_new(
        &self,
        tenant_id: Uuid,
        drive_id: &str,
        change_key: &str,
    ) -> Result<bool, DedupError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| DedupError::Coordinator(e.to_string()))?;
        let key = meridian_core::keys::sharepoint_change_key(tenant_id, drive_id);
        let recorded: i64 = redis::Script::new(RECORD_SCRIPT)
            .key(&key)
            .arg(change_key)
            .arg(self.ttl_seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| DedupError::Coordinator(e.to_string()))?;
        Ok(recorded == 1)
    }
}
