//! Redis-backed rate limit store for production deployments.
//!
//! The sliding window lives in a sorted set per key, scored by hit time in
//! epoch milliseconds. Check-and-record runs as one Lua script so that no
//! other client can interleave between counting and adding; this is what
//! keeps the quota a hard cap across every instance sharing the server.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, ErrorKind, RedisError, Script};
use secrecy::ExposeSecret;
use std::time::Duration;

use crate::config::RedisConfig;
use crate::domain::rate_limit::{FailureClass, HitOutcome, WindowSnapshot};
use crate::ports::{HitRequest, RateLimitStore, StoreError};

/// KEYS[1] window key
/// ARGV[1] now (ms), ARGV[2] window (ms), ARGV[3] max requests, ARGV[4] member
///
/// Returns `{1, hits}` when admitted or `{0, hits, oldest_score}` when full.
const RECORD_HIT_LUA: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)

if count >= limit then
  local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
  local oldest_score = now
  if oldest[2] then
    oldest_score = tonumber(oldest[2])
  end
  return {0, count, oldest_score}
end

redis.call('ZADD', key, ARGV[1], ARGV[4])
redis.call('PEXPIRE', key, window)
return {1, count + 1}
"#;

/// KEYS[1] window key
/// ARGV[1] window start (ms), exclusive
///
/// Returns `{hits}` or `{hits, oldest_score}`. Never writes.
const WINDOW_SNAPSHOT_LUA: &str = r#"
local key = KEYS[1]
local min = '(' .. ARGV[1]
local count = redis.call('ZCOUNT', key, min, '+inf')
local oldest = redis.call('ZRANGEBYSCORE', key, min, '+inf', 'WITHSCORES', 'LIMIT', 0, 1)
if oldest[2] then
  return {count, tonumber(oldest[2])}
end
return {count}
"#;

static RECORD_HIT: Lazy<Script> = Lazy::new(|| Script::new(RECORD_HIT_LUA));
static WINDOW_SNAPSHOT: Lazy<Script> = Lazy::new(|| Script::new(WINDOW_SNAPSHOT_LUA));

const SCAN_BATCH: usize = 500;

/// Redis-backed store for multi-instance deployments.
#[derive(Clone)]
pub struct RedisRateLimitStore {
    conn: MultiplexedConnection,
}

impl RedisRateLimitStore {
    /// Wrap an existing connection.
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }

    /// Open a connection and validate it with `PING`.
    ///
    /// Call once during startup and share the store; the multiplexed
    /// connection is cheap to clone per request.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(config.url.expose_secret().as_str()).map_err(classify_error)?;

        let mut conn = tokio::time::timeout(
            config.connect_timeout(),
            client.get_multiplexed_tokio_connection(),
        )
        .await
        .map_err(|_| StoreError::timeout(config.connect_timeout()))?
        .map_err(classify_error)?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(classify_error)?;
        if pong != "PONG" {
            return Err(StoreError::protocol(format!("unexpected PING reply: {}", pong)));
        }

        tracing::info!("Connected to rate limit backend");
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn record_hit(&self, key: &str, hit: &HitRequest) -> Result<HitOutcome, StoreError> {
        let mut conn = self.conn.clone();

        let reply: Vec<i64> = RECORD_HIT
            .key(key)
            .arg(hit.now_ms)
            .arg(hit.window_ms)
            .arg(hit.max_requests)
            .arg(&hit.member)
            .invoke_async(&mut conn)
            .await
            .map_err(classify_error)?;

        parse_hit_reply(&reply)
    }

    async fn window_snapshot(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: u64,
    ) -> Result<WindowSnapshot, StoreError> {
        let mut conn = self.conn.clone();
        let window_start = now_ms.saturating_sub(window_ms as i64);

        let reply: Vec<i64> = WINDOW_SNAPSHOT
            .key(key)
            .arg(window_start)
            .invoke_async(&mut conn)
            .await
            .map_err(classify_error)?;

        parse_snapshot_reply(&reply)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(classify_error)
    }

    async fn set_flag(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let ttl_ms = ttl.as_millis().max(1) as u64;
        redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(classify_error)
    }

    async fn flag_exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        conn.exists::<_, bool>(key).await.map_err(classify_error)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .cursor_arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(classify_error)?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

impl std::fmt::Debug for RedisRateLimitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRateLimitStore").finish_non_exhaustive()
    }
}

fn parse_hit_reply(reply: &[i64]) -> Result<HitOutcome, StoreError> {
    match reply {
        [1, hits] if *hits > 0 => Ok(HitOutcome::Admitted { hits: *hits as u64 }),
        [0, hits, oldest] if *hits >= 0 => Ok(HitOutcome::Rejected {
            hits: *hits as u64,
            oldest_hit_ms: Some(*oldest),
        }),
        other => Err(StoreError::protocol(format!(
            "unexpected record_hit reply: {:?}",
            other
        ))),
    }
}

fn parse_snapshot_reply(reply: &[i64]) -> Result<WindowSnapshot, StoreError> {
    match reply {
        [hits] if *hits >= 0 => Ok(WindowSnapshot {
            hits: *hits as u64,
            oldest_hit_ms: None,
        }),
        [hits, oldest] if *hits >= 0 => Ok(WindowSnapshot {
            hits: *hits as u64,
            oldest_hit_ms: Some(*oldest),
        }),
        other => Err(StoreError::protocol(format!(
            "unexpected window_snapshot reply: {:?}",
            other
        ))),
    }
}

/// Maps a Redis error onto the failure classes the degradation policy
/// reports on.
fn classify_error(err: RedisError) -> StoreError {
    StoreError::new(failure_class(&err), err.to_string())
}

fn failure_class(err: &RedisError) -> FailureClass {
    if err.is_timeout() {
        return FailureClass::Timeout;
    }
    if err.is_connection_refusal() {
        return FailureClass::ConnectionRefused;
    }

    let message = err.to_string().to_lowercase();
    if err.kind() == ErrorKind::AuthenticationFailed
        || message.contains("wrongpass")
        || message.contains("noauth")
    {
        return FailureClass::Auth;
    }
    if message.contains("failed to lookup address")
        || message.contains("name or service not known")
        || message.contains("nodename nor servname")
        || message.contains("no such host")
    {
        return FailureClass::Dns;
    }
    if err.kind() == ErrorKind::TypeError || message.contains("wrongtype") {
        return FailureClass::Protocol;
    }
    FailureClass::Generic
}
