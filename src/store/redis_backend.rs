//! Redis-backed store. Window checks and tag operations run as Lua scripts
//! so each one is a single atomic step on the server.

use super::{Store, WindowCount};
use crate::utils::now_millis;
use crate::{Error, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

const CHECK_WINDOW_LUA: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. (now - window))
local count = redis.call('ZCARD', key)
local recorded = 0
if count < limit then
  redis.call('ZADD', key, now, ARGV[4])
  count = count + 1
  recorded = 1
end
redis.call('PEXPIRE', key, window)
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_score = -1
if oldest[2] then
  oldest_score = tonumber(oldest[2])
end
return {count, recorded, oldest_score}
"#;

const INCREMENT_LUA: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. (now - window))
redis.call('ZADD', key, now, ARGV[3])
redis.call('PEXPIRE', key, window)
return redis.call('ZCARD', key)
"#;

// KEYS: value, its membership set, then the new tag sets.
// Memberships from a previous write are dropped first.
const SET_TAGGED_LUA: &str = r#"
local value_key = KEYS[1]
local memberships = KEYS[2]
local ttl = tonumber(ARGV[2])
for _, old in ipairs(redis.call('SMEMBERS', memberships)) do
  redis.call('SREM', old, value_key)
end
redis.call('DEL', memberships)
redis.call('SET', value_key, ARGV[1], 'PX', ttl)
for i = 3, #KEYS do
  redis.call('SADD', KEYS[i], value_key)
  redis.call('SADD', memberships, KEYS[i])
  if redis.call('PTTL', KEYS[i]) < ttl then
    redis.call('PEXPIRE', KEYS[i], ttl)
  end
end
if #KEYS > 2 then
  redis.call('PEXPIRE', memberships, ttl)
end
return 1
"#;

const DELETE_LUA: &str = r#"
for _, tag in ipairs(redis.call('SMEMBERS', KEYS[2])) do
  redis.call('SREM', tag, KEYS[1])
end
redis.call('DEL', KEYS[2])
return redis.call('DEL', KEYS[1])
"#;

// ARGV[1] is the key prefix, used to find each member's membership set.
const DELETE_BY_TAG_LUA: &str = r#"
local prefix = ARGV[1]
local removed = 0
for _, k in ipairs(redis.call('SMEMBERS', KEYS[1])) do
  local memberships = prefix .. 'tags:' .. string.sub(k, #prefix + 1)
  for _, other in ipairs(redis.call('SMEMBERS', memberships)) do
    if other ~= KEYS[1] then
      redis.call('SREM', other, k)
    end
  end
  redis.call('DEL', memberships)
  removed = removed + redis.call('DEL', k)
end
redis.call('DEL', KEYS[1])
return removed
"#;

/// Distributed [`Store`] on top of a Redis-compatible server.
///
/// Connections are established lazily and re-established after any failure.
/// Every round-trip is bounded by `operation_timeout`; a slow server is
/// reported as [`Error::StoreUnavailable`] like a dead one.
///
/// Each tagged value keeps a membership set (`{prefix}tags:{key}`) naming
/// its tag sets, so overwriting or deleting it also removes it from them.
/// The tag scripts reach keys found inside those sets rather than passed in
/// `KEYS`. On Redis Cluster every key must therefore hash to one slot: put a
/// hash tag in the prefix, e.g. `{resilience}:`.
pub struct RedisStore {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    key_prefix: String,
    operation_timeout: Duration,
    check_window: Script,
    increment: Script,
    set_tagged: Script,
    delete: Script,
    delete_by_tag: Script,
}

impl RedisStore {
    /// Parse `url`; no connection is made until the first operation.
    pub fn open(url: &str, key_prefix: impl Into<String>, operation_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
            key_prefix: key_prefix.into(),
            operation_timeout,
            check_window: Script::new(CHECK_WINDOW_LUA),
            increment: Script::new(INCREMENT_LUA),
            set_tagged: Script::new(SET_TAGGED_LUA),
            delete: Script::new(DELETE_LUA),
            delete_by_tag: Script::new(DELETE_BY_TAG_LUA),
        })
    }

    fn value_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}tag:{}", self.key_prefix, tag)
    }

    fn memberships_key(&self, key: &str) -> String {
        format!("{}tags:{}", self.key_prefix, key)
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = tokio::time::timeout(
            self.operation_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| Error::store_unavailable("redis", "connect timed out"))??;
        debug!("redis store connected");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn reset_connection(&self) {
        self.conn.lock().await.take();
    }

    /// Run one round-trip with the operation timeout; drop the cached
    /// connection on failure so the next call reconnects.
    async fn round_trip<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.connection().await?;
        let outcome = match tokio::time::timeout(self.operation_timeout, op(conn)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => Error::from(e),
            Err(_) => Error::store_unavailable("redis", "operation timed out"),
        };
        self.reset_connection().await;
        Err(outcome)
    }
}

fn unique_member(now_ms: u64) -> String {
    format!("{}-{}", now_ms, uuid::Uuid::new_v4().simple())
}

#[async_trait]
impl Store for RedisStore {
    async fn check_window(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        limit: u64,
    ) -> Result<WindowCount> {
        let key = self.value_key(key);
        let window_ms = window.as_millis() as u64;
        let member = unique_member(now_ms);
        let script = &self.check_window;
        let reply: Vec<i64> = self
            .round_trip(|mut conn| async move {
                script
                    .key(&key)
                    .arg(now_ms)
                    .arg(window_ms)
                    .arg(limit)
                    .arg(&member)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        match reply.as_slice() {
            [count, recorded, oldest] => Ok(WindowCount {
                count: (*count).max(0) as u64,
                recorded: *recorded == 1,
                oldest_ms: (*oldest >= 0).then_some(*oldest as u64),
            }),
            _ => Err(Error::store_unavailable(
                "redis",
                "unexpected reply shape from window script",
            )),
        }
    }

    async fn increment_and_count(&self, key: &str, window: Duration) -> Result<u64> {
        let key = self.value_key(key);
        let now_ms = now_millis();
        let window_ms = window.as_millis() as u64;
        let member = unique_member(now_ms);
        let script = &self.increment;
        let count: i64 = self
            .round_trip(|mut conn| async move {
                script
                    .key(&key)
                    .arg(now_ms)
                    .arg(window_ms)
                    .arg(&member)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = self.value_key(key);
        self.round_trip(|mut conn| async move {
            redis::cmd("GET").arg(&key).query_async(&mut conn).await
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration, tags: &[String]) -> Result<()> {
        let memberships = self.memberships_key(key);
        let key = self.value_key(key);
        let tag_keys: Vec<String> = tags.iter().map(|t| self.tag_key(t)).collect();
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        let script = &self.set_tagged;
        let _: i64 = self
            .round_trip(|mut conn| async move {
                let mut invocation = script.key(&key);
                invocation.key(&memberships);
                for tag_key in &tag_keys {
                    invocation.key(tag_key);
                }
                invocation
                    .arg(value)
                    .arg(ttl_ms)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let memberships = self.memberships_key(key);
        let key = self.value_key(key);
        let script = &self.delete;
        let removed: i64 = self
            .round_trip(|mut conn| async move {
                script
                    .key(&key)
                    .key(&memberships)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(removed > 0)
    }

    async fn delete_by_tag(&self, tag: &str) -> Result<u64> {
        let tag_key = self.tag_key(tag);
        let prefix = &self.key_prefix;
        let script = &self.delete_by_tag;
        let removed: i64 = self
            .round_trip(|mut conn| async move {
                script
                    .key(&tag_key)
                    .arg(prefix)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(removed.max(0) as u64)
    }

    async fn ping(&self) -> Result<()> {
        let _: String = self
            .round_trip(|mut conn| async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let store = RedisStore::open("redis://127.0.0.1/", "rc:", Duration::from_millis(50)).unwrap();
        assert_eq!(store.value_key("rl:auth:user:1"), "rc:rl:auth:user:1");
        assert_eq!(store.tag_key("deck:7"), "rc:tag:deck:7");
        assert_eq!(store.memberships_key("cache:a"), "rc:tags:cache:a");
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(RedisStore::open("not a url", "rc:", Duration::from_millis(50)).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_reports_unavailable() {
        // Port 1 is reserved; connecting is refused immediately.
        let store = RedisStore::open("redis://127.0.0.1:1/", "rc:", Duration::from_millis(200)).unwrap();
        match store.ping().await {
            Err(Error::StoreUnavailable { backend, .. }) => assert_eq!(backend, "redis"),
            other => panic!("expected StoreUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    #[ignore = "requires a Redis server at REDIS_URL"]
    async fn test_live_window_and_tags() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());
        let prefix = format!("rc-test-{}:", uuid::Uuid::new_v4().simple());
        let store = RedisStore::open(&url, prefix, Duration::from_secs(1)).unwrap();
        let now = now_millis();
        let window = Duration::from_secs(60);
        for i in 0..2 {
            assert!(store.check_window("w", now + i, window, 2).await.unwrap().recorded);
        }
        let denied = store.check_window("w", now + 5, window, 2).await.unwrap();
        assert!(!denied.recorded);
        assert_eq!(denied.oldest_ms, Some(now));

        let tags = vec!["t".to_string()];
        store.set("a", b"1", window, &tags).await.unwrap();
        store.set("b", b"2", window, &[]).await.unwrap();
        assert_eq!(store.delete_by_tag("t").await.unwrap(), 1);
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("b").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    #[ignore = "requires a Redis server at REDIS_URL"]
    async fn test_live_overwrite_drops_previous_tags() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());
        let prefix = format!("{{rc-test-{}}}:", uuid::Uuid::new_v4().simple());
        let store = RedisStore::open(&url, prefix, Duration::from_secs(1)).unwrap();
        let ttl = Duration::from_secs(60);

        store.set("a", b"1", ttl, &["old".to_string()]).await.unwrap();
        store.set("a", b"2", ttl, &["new".to_string()]).await.unwrap();
        assert_eq!(store.delete_by_tag("old").await.unwrap(), 0);
        assert_eq!(store.get("a").await.unwrap(), Some(b"2".to_vec()));

        // Deleting by one tag also forgets the key under its other tags.
        let both = vec!["x".to_string(), "y".to_string()];
        store.set("b", b"3", ttl, &both).await.unwrap();
        assert_eq!(store.delete_by_tag("x").await.unwrap(), 1);
        store.set("b", b"4", ttl, &[]).await.unwrap();
        assert_eq!(store.delete_by_tag("y").await.unwrap(), 0);
        assert_eq!(store.get("b").await.unwrap(), Some(b"4".to_vec()));

        assert!(store.delete("a").await.unwrap());
        assert_eq!(store.delete_by_tag("new").await.unwrap(), 0);
    }
}
