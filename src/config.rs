use anyhow::{bail, Result};
use std::time::Duration;

// Defaults mirror the deployment the control plane was designed for.
const DEFAULT_SERVER_PORT: u16 = 8080;
const DEFAULT_REDIS_ADDR: &str = "redis://127.0.0.1:6379";
const DEFAULT_JWT_SECRET: &str = "secret-key";

const DEFAULT_REPLAY_WINDOW_SECS: u64 = 60;
const DEFAULT_CACHE_TTL_SECS: u64 = 60;
const DEFAULT_METRICS_WINDOW: usize = 1000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SHUTDOWN_DRAIN_SECS: u64 = 5;

const DEFAULT_FAILURE_THRESHOLD: i64 = 3;
const DEFAULT_SUCCESS_THRESHOLD: i64 = 5;
const DEFAULT_COOLDOWN_SECS: u64 = 10;

/// What to do when a dependency the pipeline relies on is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStrategy {
    /// Allow the request through and log a warning.
    FailOpen,
    /// Reject the request with a 500.
    FailClosed,
}

impl FailureStrategy {
    /// Whether traffic may proceed despite a dependency error.
    pub fn allows_on_error(&self) -> bool {
        matches!(self, FailureStrategy::FailOpen)
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "fail_open" => Ok(FailureStrategy::FailOpen),
            "fail_closed" => Ok(FailureStrategy::FailClosed),
            other => bail!("unknown failure strategy '{}' (expected fail_open or fail_closed)", other),
        }
    }
}

/// Replay protection settings for the security-header layer.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub enabled: bool,
    pub window: Duration,
}

/// Circuit breaker settings.
///
/// `success_threshold` is carried for configuration compatibility; the
/// implicit half-open design closes the breaker on a single successful
/// probe.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: i64,
    pub success_threshold: i64,
    pub cooldown: Duration,
    /// Name of the downstream the breaker guards.
    pub downstream: String,
}

/// Rate limiter settings beyond the per-policy rate/burst.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    pub failure_strategy: FailureStrategy,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    /// Postgres connection string. Empty selects the in-memory repository.
    pub database_url: String,
    pub redis_addr: String,
    pub jwt_secret: String,

    pub replay: ReplayConfig,
    pub breaker: BreakerConfig,
    pub limiter: LimiterConfig,

    pub cache_ttl: Duration,
    pub metrics_window: usize,
    pub request_timeout: Duration,
    pub shutdown_drain: Duration,
}

impl Config {
    /// Loads configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let server_port = env_parse("SERVER_PORT", DEFAULT_SERVER_PORT)?;
        let database_url = env_or("DATABASE_URL", "");
        let redis_addr = env_or("REDIS_ADDR", DEFAULT_REDIS_ADDR);
        let jwt_secret = env_or("JWT_SECRET", DEFAULT_JWT_SECRET);

        if jwt_secret == DEFAULT_JWT_SECRET {
            tracing::warn!("JWT_SECRET is not set; using the development default");
        }

        let replay = ReplayConfig {
            enabled: env_parse("REPLAY_PROTECTION", true)?,
            window: Duration::from_secs(env_parse(
                "REPLAY_WINDOW_SECS",
                DEFAULT_REPLAY_WINDOW_SECS,
            )?),
        };

        let breaker = BreakerConfig {
            failure_threshold: env_parse("BREAKER_FAILURE_THRESHOLD", DEFAULT_FAILURE_THRESHOLD)?,
            success_threshold: env_parse("BREAKER_SUCCESS_THRESHOLD", DEFAULT_SUCCESS_THRESHOLD)?,
            cooldown: Duration::from_secs(env_parse(
                "BREAKER_COOLDOWN_SECS",
                DEFAULT_COOLDOWN_SECS,
            )?),
            downstream: env_or("BREAKER_DOWNSTREAM", "main-service"),
        };

        let limiter = LimiterConfig {
            failure_strategy: FailureStrategy::parse(&env_or(
                "LIMITER_FAILURE_STRATEGY",
                "fail_open",
            ))?,
        };

        Ok(Self {
            server_port,
            database_url,
            redis_addr,
            jwt_secret,
            replay,
            breaker,
            limiter,
            cache_ttl: Duration::from_secs(env_parse("CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)?),
            metrics_window: env_parse("METRICS_WINDOW", DEFAULT_METRICS_WINDOW)?,
            request_timeout: Duration::from_secs(env_parse(
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
            shutdown_drain: Duration::from_secs(env_parse(
                "SHUTDOWN_DRAIN_SECS",
                DEFAULT_SHUTDOWN_DRAIN_SECS,
            )?),
        })
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| fallback.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", key, e)),
        Err(_) => Ok(fallback),
    }
}
