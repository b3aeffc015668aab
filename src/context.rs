use redis::aio::ConnectionManager;
use std::sync::Arc;

use crate::audit::AuditLogger;
use crate::auth::JwtManager;
use crate::breaker::CircuitGuard;
use crate::config::Config;
use crate::keys::ApiKeyService;
use crate::limiter::RateLimiter;
use crate::metrics::MetricsCollector;
use crate::policy::PolicyEngine;
use crate::repository::{ApiKeyRepository, UserRepository};

/// Shared dependencies handed to every layer and handler.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub policy_engine: Arc<PolicyEngine>,
    pub jwt: Arc<JwtManager>,
    pub api_keys: Arc<ApiKeyService>,
    pub limiter: Arc<dyn RateLimiter>,
    pub breaker: Arc<dyn CircuitGuard>,
    pub metrics: Arc<MetricsCollector>,
    pub audit: Arc<AuditLogger>,
    pub users: Arc<dyn UserRepository>,
    pub api_key_repo: Arc<dyn ApiKeyRepository>,
    /// Shared-store handle for readiness probing. Absent in test setups
    /// that stub the limiter and breaker.
    pub redis: Option<ConnectionManager>,
}
