use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

/// Single-instance leader election, backed by the coordinator.
///
/// `try_acquire` is idempotent for the current holder: calling it again
/// before the lease expires renews the TTL rather than failing.
#[async_trait]
pub trait LeaderLock: Send + Sync {
    async fn try_acquire(
        &self,
        ttl: Duration,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>>;

    async fn release(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

const RENEW_OR_ACQUIRE_SCRIPT: &str = r#"
local key = KEYS[1]
local token = ARGV[1]
local ttl_ms = ARGV[2]
local current = redis.call('GET', key)
if current == false or current == token then
    redis.call('SET', key, token, 'PX', ttl_ms)
    return 1
end
return 0
"#;

const RELEASE_SCRIPT: &str = r#"
local key = KEYS[1]
local token = ARGV[1]
if redis.call('GET', key) == token then
    return redis.call('DEL', key)
end
return 0
"#;

/// Redlock-style single-instance leader lock. Holds a process-unique token
/// so a lease can only be renewed or released by the process that won it.
pub struct RedisLeaderLock {
    client: redis::Client,
    key: String,
    token: String,
}

impl RedisLeaderLock {
    pub fn new(redis_url: &str, key: impl Into<String>) -> Result<Self, redis::RedisError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            key: key.into(),
            token: Uuid::new_v4().to_string(),
        })
    }
}

#[async_trait]
impl LeaderLock for RedisLeaderLock {
    async fn try_acquire(
        &self,
        ttl: Duration,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let acquired: i64 = redis::Script::new(RENEW_OR_ACQUIRE_SCRIPT)
            .key(&self.key)
            .arg(&self.token)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(acquired == 1)
    }

    async fn release(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}
