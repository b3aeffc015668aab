use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

use crate::error::{AppError, AppResult};

/// Criteria deciding whether a policy applies to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matcher {
    /// HTTP method to match. Empty or "*" matches any method.
    #[serde(default)]
    pub method: String,
    /// Path prefix to match.
    pub path_prefix: String,
}

/// What a matching policy enforces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rules {
    pub auth_required: bool,
    /// Tokens per second.
    pub rate_limit: f64,
    pub burst: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub matcher: Matcher,
    pub rules: Rules,
}

impl Policy {
    fn matches(&self, method: &str, path: &str) -> bool {
        let m = &self.matcher;
        if !m.method.is_empty() && m.method != "*" && m.method != method {
            return false;
        }
        path.starts_with(&m.path_prefix)
    }
}

/// Default limits applied when no policy matches, adjustable at runtime
/// through the admin reload endpoint.
#[derive(Debug, Clone, Copy)]
struct DefaultLimits {
    rate_limit: f64,
    burst: u32,
}

/// Evaluates requests against an ordered policy list.
///
/// Conflict resolution is first match wins, in insertion order. Reload
/// replaces the whole list atomically: a request observes either the full
/// old set or the full new set, never a mix.
pub struct PolicyEngine {
    policies: RwLock<Arc<Vec<Policy>>>,
    defaults: RwLock<DefaultLimits>,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self {
            policies: RwLock::new(Arc::new(Vec::new())),
            defaults: RwLock::new(DefaultLimits {
                rate_limit: 1.0,
                burst: 5,
            }),
        }
    }

    /// Replaces the current policy set. Rejects records violating the
    /// `burst >= 1` / `rate_limit >= 0` invariants so a bad reload cannot
    /// poison evaluation.
    pub fn load_policies(&self, new_policies: Vec<Policy>) -> AppResult<()> {
        for p in &new_policies {
            if p.rules.burst < 1 {
                return Err(AppError::Validation(format!(
                    "policy '{}': burst must be at least 1",
                    p.id
                )));
            }
            if p.rules.rate_limit < 0.0 {
                return Err(AppError::Validation(format!(
                    "policy '{}': rate_limit must not be negative",
                    p.id
                )));
            }
        }

        let count = new_policies.len();
        *self.policies.write().expect("policy lock poisoned") = Arc::new(new_policies);
        tracing::info!(policies = count, "policy set replaced");
        Ok(())
    }

    /// Updates the fallback rate/burst used when no policy matches.
    pub fn set_default_limits(&self, rate_limit: f64, burst: u32) -> AppResult<()> {
        if burst < 1 {
            return Err(AppError::Validation(
                "default burst must be at least 1".to_string(),
            ));
        }
        if rate_limit < 0.0 {
            return Err(AppError::Validation(
                "default rate_limit must not be negative".to_string(),
            ));
        }
        *self.defaults.write().expect("policy lock poisoned") = DefaultLimits { rate_limit, burst };
        Ok(())
    }

    /// Returns the first policy whose matcher accepts the request, or `None`.
    pub fn evaluate(&self, method: &str, path: &str) -> Option<Policy> {
        let policies = self.policies.read().expect("policy lock poisoned").clone();
        policies.iter().find(|p| p.matches(method, path)).cloned()
    }

    /// Secure default substituted by the enforcing layer when `evaluate`
    /// finds nothing: authentication required, current default limits.
    pub fn fallback_policy(&self) -> Policy {
        let defaults = *self.defaults.read().expect("policy lock poisoned");
        Policy {
            id: "default".to_string(),
            matcher: Matcher {
                method: "*".to_string(),
                path_prefix: String::new(),
            },
            rules: Rules {
                auth_required: true,
                rate_limit: defaults.rate_limit,
                burst: defaults.burst,
            },
        }
    }

    /// Snapshot of the loaded policies, for the admin surface.
    pub fn list_policies(&self) -> Arc<Vec<Policy>> {
        self.policies.read().expect("policy lock poisoned").clone()
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// The policy set installed at boot.
pub fn seed_policies() -> Vec<Policy> {
    fn policy(id: &str, path_prefix: &str, auth_required: bool, rate_limit: f64, burst: u32) -> Policy {
        Policy {
            id: id.to_string(),
            matcher: Matcher {
                method: String::new(),
                path_prefix: path_prefix.to_string(),
            },
            rules: Rules {
                auth_required,
                rate_limit,
                burst,
            },
        }
    }

    vec![
        policy("admin-policy", "/api/admin", true, 10.0, 20),
        policy("public-policy", "/api/public", false, 5.0, 10),
        policy("health-policy", "/health", false, 100.0, 100),
        policy("ready-policy", "/ready", false, 100.0, 100),
        policy("metrics-policy", "/metrics", false, 100.0, 100),
        policy("stats-policy", "/api/metrics", false, 100.0, 100),
        policy("test-policy", "/api/test", false, 10.0, 20),
    ]
}
