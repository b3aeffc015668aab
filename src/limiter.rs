use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{AppError, AppResult};

/// Seconds of inactivity before a bucket is reclaimed. A reclaimed key reads
/// as a full bucket on its next use.
const BUCKET_TTL_SECS: u64 = 60;

/// Token-bucket refill and consume, executed atomically server-side.
///
/// KEYS[1] = bucket key
/// ARGV[1] = capacity (burst)
/// ARGV[2] = refill rate (tokens per second)
/// ARGV[3] = current timestamp (unix seconds)
/// ARGV[4] = requested tokens
/// ARGV[5] = idle TTL in seconds
///
/// Returns [allowed (1/0), remaining] with remaining as a string so
/// fractional tokens survive the reply encoding.
static TOKEN_BUCKET_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local requested = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])

local info = redis.call("HMGET", key, "tokens", "last_refill")
local tokens = tonumber(info[1])
local last_refill = tonumber(info[2])

if not tokens then
  tokens = capacity
  last_refill = now
end

local delta = math.max(0, now - last_refill)
local filled = math.min(capacity, tokens + delta * rate)

local allowed = 0
if filled >= requested then
  allowed = 1
  filled = filled - requested
end

redis.call("HMSET", key, "tokens", filled, "last_refill", now)
redis.call("EXPIRE", key, ttl)

return {allowed, tostring(filled)}
"#,
    )
});

/// Admission decision contract for the rate-limit layer.
///
/// Returns `(allowed, remaining_tokens)`. Bucket exhaustion is an `Ok` with
/// `allowed = false`; an `Err` always means the backing store failed, so the
/// two are never conflated.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn allow(&self, key: &str, rate: f64, burst: u32) -> AppResult<(bool, f64)>;
}

/// Distributed token-bucket limiter over a shared Redis store.
///
/// All bucket state lives in Redis, serialized per key by the script, so
/// every gateway instance sharing the store enforces one combined limit.
pub struct TokenBucketLimiter {
    conn: ConnectionManager,
}

impl TokenBucketLimiter {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn allow(&self, key: &str, rate: f64, burst: u32) -> AppResult<(bool, f64)> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AppError::internal(format!("system clock before epoch: {}", e)))?
            .as_secs();

        let mut conn = self.conn.clone();
        let (allowed, remaining): (i64, String) = TOKEN_BUCKET_SCRIPT
            .key(key)
            .arg(burst)
            .arg(rate)
            .arg(now)
            .arg(1)
            .arg(BUCKET_TTL_SECS)
            .invoke_async(&mut conn)
            .await?;

        let remaining: f64 = remaining
            .parse()
            .map_err(|e| AppError::internal(format!("bad limiter reply: {}", e)))?;

        Ok((allowed == 1, remaining))
    }
}

/// Bucket key for an authenticated principal.
pub fn user_key(principal_id: &str) -> String {
    format!("ratelimit:user:{}", principal_id)
}

/// Bucket key for an unauthenticated caller, by source address.
pub fn ip_key(addr: &str) -> String {
    format!("ratelimit:ip:{}", addr)
}
