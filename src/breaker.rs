use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;

use crate::config::BreakerConfig;
use crate::error::{AppError, AppResult};

/// Circuit breaker admission contract used by the pipeline.
///
/// Split into admit/record so HTTP layers, which learn the outcome from the
/// status code written downstream, can report it after the fact.
#[async_trait]
pub trait CircuitGuard: Send + Sync {
    /// `Err(CircuitOpen)` while the downstream is quarantined.
    async fn allow(&self, name: &str) -> AppResult<()>;
    async fn record_success(&self, name: &str) -> AppResult<()>;
    async fn record_failure(&self, name: &str) -> AppResult<()>;
}

/// Per-downstream breaker state machine over a shared Redis store.
///
/// Two keys per downstream: `cb:<name>:open`, a presence flag whose TTL is
/// the cooldown, and `cb:<name>:failures`, a consecutive-failure counter.
/// Closed means no flag; Open means the flag exists. Half-open is implicit:
/// when the flag's TTL lapses the next call probes in closed semantics, so
/// one failed probe re-arms the flag and one success clears the counter.
pub struct CircuitBreaker {
    conn: ConnectionManager,
    config: BreakerConfig,
}

impl CircuitBreaker {
    pub fn new(conn: ConnectionManager, config: BreakerConfig) -> Self {
        Self { conn, config }
    }

    fn open_key(name: &str) -> String {
        format!("cb:{}:open", name)
    }

    fn failure_key(name: &str) -> String {
        format!("cb:{}:failures", name)
    }

    /// Runs `action` under breaker protection, for callers whose failures
    /// arrive as errors rather than status codes.
    pub async fn execute<F, Fut, T>(&self, name: &str, action: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        self.allow(name).await?;

        match action().await {
            Ok(value) => {
                self.record_success(name).await?;
                Ok(value)
            }
            Err(err) => {
                self.record_failure(name).await?;
                Err(err)
            }
        }
    }
}

#[async_trait]
impl CircuitGuard for CircuitBreaker {
    async fn allow(&self, name: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let open: bool = conn.exists(Self::open_key(name)).await?;

        if open {
            return Err(AppError::CircuitOpen(name.to_string()));
        }
        Ok(())
    }

    async fn record_success(&self, name: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(Self::failure_key(name)).await?;
        Ok(())
    }

    async fn record_failure(&self, name: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let failures: i64 = conn.incr(Self::failure_key(name), 1).await?;

        if failures >= self.config.failure_threshold {
            let _: () = conn
                .set_ex(Self::open_key(name), 1, self.config.cooldown.as_secs())
                .await?;
            let _: () = conn.del(Self::failure_key(name)).await?;

            tracing::warn!(
                downstream = name,
                failures,
                threshold = self.config.failure_threshold,
                cooldown_secs = self.config.cooldown.as_secs(),
                "circuit breaker opened"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shapes() {
        assert_eq!(CircuitBreaker::open_key("payments"), "cb:payments:open");
        assert_eq!(
            CircuitBreaker::failure_key("payments"),
            "cb:payments:failures"
        );
    }
}
