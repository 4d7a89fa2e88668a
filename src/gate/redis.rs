//! Shared gate store backed by Redis.
//!
//! Entitlements use Redis' native expiry: a reset is a single `SETEX` and a
//! read is a `TTL` probe, so repeated resets always yield exactly the
//! configured TTL from the most recent signal. The sliding window runs as
//! one Lua script so the ban check, prune, count, and append happen as a
//! single atomic round trip; no local lock is held across the call.
//!
//! Any deployment running more than one process instance must use this
//! store. Every operation carries a bounded deadline and the gate fails
//! closed when the deadline or the connection is lost.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::{GateConfig, StoreConfig};
use crate::error::{GateError, Result};

use super::store::{Decision, GateStore};

/// Ban check, window prune, count, and conditional ban/append in one
/// atomic script. KEYS = [window zset, ban key]; ARGV = [now_ms,
/// window_ms, limit, ban_sec, member]. Returns {allowed, retry_after_sec}.
const ALLOW_SCRIPT: &str = r#"
local ban_ttl = redis.call('TTL', KEYS[2])
if ban_ttl > 0 then
  return {0, ban_ttl}
end
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local ban = tonumber(ARGV[4])
redis.call('ZREMRANGEBYSCORE', KEYS[1], 0, now - window)
if redis.call('ZCARD', KEYS[1]) >= limit then
  redis.call('SETEX', KEYS[2], ban, '1')
  return {0, ban}
end
redis.call('ZADD', KEYS[1], now, ARGV[5])
redis.call('PEXPIRE', KEYS[1], window)
return {1, 0}
"#;

/// Gate store backed by a shared Redis instance.
pub struct RedisStore {
    client: redis::Client,
    allow_script: Script,
    timeout: Duration,
    ready_ttl_sec: u64,
    window_ms: u64,
    limit: usize,
    ban_sec: u64,
}

impl RedisStore {
    /// Create a new store from the store and gate configuration. Opening
    /// the client does not touch the network; connections are established
    /// lazily per operation.
    pub fn new(store: &StoreConfig, gate: &GateConfig) -> Result<Self> {
        let client = redis::Client::open(store.redis_url.as_str())?;
        Ok(Self {
            client,
            allow_script: Script::new(ALLOW_SCRIPT),
            timeout: Duration::from_millis(store.timeout_ms),
            ready_ttl_sec: gate.ready_ttl_sec,
            window_ms: gate.window_sec * 1000,
            limit: gate.limit,
            ban_sec: gate.ban_sec,
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn ready_key(key: &str) -> String {
        format!("ready:{}", key)
    }

    fn window_key(key: &str) -> String {
        format!("window:{}", key)
    }

    fn ban_key(key: &str) -> String {
        format!("ban:{}", key)
    }
}

#[async_trait]
impl GateStore for RedisStore {
    async fn reset(&self, key: &str) -> Result<u64> {
        let deadline = self.timeout;
        let op = async {
            let mut conn = self.connection().await?;
            // SETEX replaces any prior TTL, so the expiry is never additive
            redis::cmd("SETEX")
                .arg(Self::ready_key(key))
                .arg(self.ready_ttl_sec)
                .arg("1")
                .query_async::<()>(&mut conn)
                .await?;
            Ok(self.ready_ttl_sec)
        };
        match tokio::time::timeout(deadline, op).await {
            Ok(result) => result,
            Err(_) => Err(GateError::StoreTimeout(deadline)),
        }
    }

    async fn is_open(&self, key: &str) -> Result<bool> {
        let deadline = self.timeout;
        let op = async {
            let mut conn = self.connection().await?;
            // TTL is -2 for a missing key and -1 for a key without expiry;
            // neither counts as open
            let ttl: i64 = redis::cmd("TTL")
                .arg(Self::ready_key(key))
                .query_async(&mut conn)
                .await?;
            trace!(key = %key, ttl = ttl, "Entitlement TTL probed");
            Ok(ttl > 0)
        };
        match tokio::time::timeout(deadline, op).await {
            Ok(result) => result,
            Err(_) => Err(GateError::StoreTimeout(deadline)),
        }
    }

    async fn allow(&self, key: &str) -> Result<Decision> {
        let deadline = self.timeout;
        let op = async {
            let mut conn = self.connection().await?;
            let now_ms = chrono::Utc::now().timestamp_millis();
            // Unique member so concurrent hits in the same millisecond are
            // all counted
            let member = format!("{}-{}", now_ms, uuid::Uuid::new_v4());
            let (allowed, retry_after_sec): (i64, i64) = self
                .allow_script
                .key(Self::window_key(key))
                .key(Self::ban_key(key))
                .arg(now_ms)
                .arg(self.window_ms)
                .arg(self.limit)
                .arg(self.ban_sec)
                .arg(member)
                .invoke_async(&mut conn)
                .await?;

            if allowed == 1 {
                Ok(Decision::Allowed)
            } else {
                debug!(key = %key, retry_after_sec = retry_after_sec, "Request denied by shared store");
                Ok(Decision::Denied {
                    retry_after: Duration::from_secs(retry_after_sec.max(0) as u64),
                })
            }
        };
        match tokio::time::timeout(deadline, op).await {
            Ok(result) => result,
            Err(_) => Err(GateError::StoreTimeout(deadline)),
        }
    }

    async fn ping(&self) -> bool {
        let op = async {
            let mut conn = self.connection().await?;
            redis::cmd("PING").query_async::<String>(&mut conn).await?;
            Ok::<_, GateError>(())
        };
        matches!(tokio::time::timeout(self.timeout, op).await, Ok(Ok(())))
    }
}

// These tests require a running Redis instance and are ignored by default.
#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> RedisStore {
        let gate = GateConfig {
            window_sec: 10,
            limit: 3,
            ban_sec: 5,
            ..GateConfig::default()
        };
        RedisStore::new(&StoreConfig::default(), &gate).unwrap()
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_reset_and_is_open() {
        let store = test_store();
        let key = format!("it-{}", uuid::Uuid::new_v4());

        assert!(!store.is_open(&key).await.unwrap());
        assert_eq!(store.reset(&key).await.unwrap(), 600);
        assert!(store.is_open(&key).await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_window_ban() {
        let store = test_store();
        let key = format!("it-{}", uuid::Uuid::new_v4());

        for _ in 0..3 {
            assert_eq!(store.allow(&key).await.unwrap(), Decision::Allowed);
        }
        match store.allow(&key).await.unwrap() {
            Decision::Denied { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(5));
            }
            other => panic!("expected denial, got {:?}", other),
        }
    }
}
