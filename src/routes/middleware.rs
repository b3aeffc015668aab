// ============================================================================
// Pipeline middleware
// ============================================================================
//
// Each layer either short-circuits with a response or forwards to the next.
// Composition order is decided in routes::build_router; the layers here only
// assume what the order guarantees: policy is attached before auth runs, and
// auth runs before the rate limiter so limits key per principal.
//
// ============================================================================

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::audit::AuditEntry;
use crate::context::AppContext;
use crate::error::AppError;
use crate::limiter;
use crate::policy::Policy;
use crate::utils::extract_client_ip;

/// How long every rejected API-key verification stalls before answering, to
/// blunt timing probes. Applies uniformly regardless of the rejection cause.
const KEY_REJECT_DELAY: Duration = Duration::from_millis(100);

/// Identity established by the authenticator. Lives in the request extension
/// map (the per-request context bag) for one request.
#[derive(Debug, Clone)]
pub struct Principal {
    pub principal_id: String,
    pub scopes: Vec<String>,
    pub auth_method: AuthMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Jwt,
    ApiKey,
    Anonymous,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Jwt => "jwt",
            AuthMethod::ApiKey => "api_key",
            AuthMethod::Anonymous => "anonymous",
        }
    }
}

/// Outermost tap: totals, status histogram, latency window.
pub async fn record_metrics(
    State(ctx): State<Arc<AppContext>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();

    let response = next.run(request).await;

    ctx.metrics
        .record(start.elapsed(), response.status().as_u16());
    response
}

/// Emits one audit line per request, whatever the outcome. The actor is read
/// from the response extensions, where the authenticator republishes the
/// principal so layers outside it can see who the request became.
pub async fn audit_trail(
    State(ctx): State<Arc<AppContext>>,
    request: Request,
    next: Next,
) -> Response {
    let started_at = chrono::Utc::now();
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let remote_addr = extract_client_ip(&request);

    let response = next.run(request).await;

    let principal = response.extensions().get::<Principal>();
    let actor_id = principal
        .map(|p| p.principal_id.clone())
        .unwrap_or_else(|| "anonymous".to_string());
    let auth_method = principal
        .map(|p| p.auth_method)
        .unwrap_or(AuthMethod::Anonymous);

    let mut metadata = Map::new();
    metadata.insert("remote_addr".into(), Value::String(remote_addr));
    metadata.insert(
        "duration_ms".into(),
        Value::from(start.elapsed().as_millis() as u64),
    );
    metadata.insert(
        "auth_method".into(),
        Value::String(auth_method.as_str().to_string()),
    );

    ctx.audit.log(AuditEntry {
        timestamp: started_at,
        tenant_id: "default".to_string(),
        actor_id,
        action: format!("{} {}", method, path),
        resource: path,
        status: response.status().as_u16(),
        metadata,
    });

    response
}

/// Sets the fixed security headers on every response and, when enabled,
/// rejects requests whose X-Timestamp falls outside the replay window.
pub async fn secure_headers(
    State(ctx): State<Arc<AppContext>>,
    request: Request,
    next: Next,
) -> Response {
    if ctx.config.replay.enabled {
        if let Err(err) = check_replay(&request, ctx.config.replay.window) {
            let mut response = err.into_response();
            apply_security_headers(&mut response);
            return response;
        }
    }

    let mut response = next.run(request).await;
    apply_security_headers(&mut response);
    response
}

fn apply_security_headers(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "X-XSS-Protection",
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        "Strict-Transport-Security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
}

fn check_replay(request: &Request, window: Duration) -> Result<(), AppError> {
    let raw = request
        .headers()
        .get("X-Timestamp")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::ReplayRejected {
            reason: "missing X-Timestamp header".to_string(),
            malformed: true,
        })?;

    let request_ts: i64 = raw.parse().map_err(|_| AppError::ReplayRejected {
        reason: "invalid X-Timestamp header".to_string(),
        malformed: true,
    })?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    if (now - request_ts).unsigned_abs() > window.as_secs() {
        return Err(AppError::ReplayRejected {
            reason: "timestamp outside allowed window".to_string(),
            malformed: false,
        });
    }

    Ok(())
}

/// Attaches the matching policy to the context bag. When nothing matches,
/// the secure default takes its place, so downstream layers always find one.
pub async fn resolve_policy(
    State(ctx): State<Arc<AppContext>>,
    mut request: Request,
    next: Next,
) -> Response {
    let policy = ctx
        .policy_engine
        .evaluate(request.method().as_str(), request.uri().path())
        .unwrap_or_else(|| ctx.policy_engine.fallback_policy());

    request.extensions_mut().insert(Arc::new(policy));
    next.run(request).await
}

/// Resolves a principal from the request credentials.
///
/// Bearer tokens are verified locally; X-API-Key goes through the key
/// service. With no credentials, the attached policy decides whether
/// anonymous passage is allowed.
pub async fn authenticate(
    State(ctx): State<Arc<AppContext>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string());

    if let Some(token) = bearer {
        let claims = ctx.jwt.verify(&token).map_err(|e| {
            tracing::warn!(error = %e, "bearer token rejected");
            AppError::InvalidCredential
        })?;

        let principal = Principal {
            principal_id: claims.user_id,
            scopes: claims.scopes,
            auth_method: AuthMethod::Jwt,
        };
        return Ok(forward_authenticated(request, next, principal).await);
    }

    let api_key = request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    if let Some(raw_key) = api_key {
        match ctx.api_keys.verify_api_key(&raw_key).await {
            Ok(principal_id) => {
                let principal = Principal {
                    principal_id,
                    scopes: vec![],
                    auth_method: AuthMethod::ApiKey,
                };
                return Ok(forward_authenticated(request, next, principal).await);
            }
            Err(e) => {
                tracing::warn!(error = %e, "API key rejected");
                tokio::time::sleep(KEY_REJECT_DELAY).await;
                return Err(AppError::InvalidCredential);
            }
        }
    }

    // No credentials at all: the policy decides.
    let auth_required = request
        .extensions()
        .get::<Arc<Policy>>()
        .map(|p| p.rules.auth_required)
        .unwrap_or(true);

    if auth_required {
        return Err(AppError::AuthRequired);
    }

    Ok(next.run(request).await)
}

async fn forward_authenticated(mut request: Request, next: Next, principal: Principal) -> Response {
    request.extensions_mut().insert(principal.clone());

    let mut response = next.run(request).await;
    // Republished so the audit layer, which sits outside this one, can
    // attribute the outcome.
    response.extensions_mut().insert(principal);
    response
}

/// Admits or rejects against the shared token bucket, keyed by principal
/// when one is present and by source address otherwise. Rate-limit headers
/// go out on every pass, allowed or not.
pub async fn enforce_rate_limit(
    State(ctx): State<Arc<AppContext>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (rate, burst) = request
        .extensions()
        .get::<Arc<Policy>>()
        .map(|p| (p.rules.rate_limit, p.rules.burst))
        .unwrap_or_else(|| {
            let fallback = ctx.policy_engine.fallback_policy();
            (fallback.rules.rate_limit, fallback.rules.burst)
        });

    let key = match request.extensions().get::<Principal>() {
        Some(principal) => limiter::user_key(&principal.principal_id),
        None => limiter::ip_key(&extract_client_ip(&request)),
    };

    match ctx.limiter.allow(&key, rate, burst).await {
        Ok((true, remaining)) => {
            let mut response = next.run(request).await;
            set_rate_limit_headers(&mut response, burst, remaining);
            Ok(response)
        }
        Ok((false, remaining)) => {
            tracing::warn!(key = %key, "rate limit exceeded");
            let mut response = AppError::RateLimited.into_response();
            set_rate_limit_headers(&mut response, burst, remaining);
            Ok(response)
        }
        Err(e) => {
            if ctx.config.limiter.failure_strategy.allows_on_error() {
                tracing::warn!(error = %e, key = %key, "rate limiter unavailable, failing open");
                Ok(next.run(request).await)
            } else {
                tracing::error!(error = %e, key = %key, "rate limiter unavailable, failing closed");
                Err(AppError::dependency("rate limiter store unreachable"))
            }
        }
    }
}

fn set_rate_limit_headers(response: &mut Response, burst: u32, remaining: f64) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&burst.to_string()) {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&(remaining.floor() as i64).to_string()) {
        headers.insert("X-RateLimit-Remaining", value);
    }
    headers.insert("X-RateLimit-Reset", HeaderValue::from_static("1"));
}

/// Wraps the downstream call in the circuit breaker. The handler signals
/// failure by writing a status, so the wrapper reads the status of the
/// response coming back: 5xx counts against the breaker, 4xx does not.
pub async fn guard_downstream(
    State(ctx): State<Arc<AppContext>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let name = ctx.config.breaker.downstream.clone();

    match ctx.breaker.allow(&name).await {
        Ok(()) => {}
        Err(AppError::CircuitOpen(name)) => {
            tracing::warn!(downstream = %name, "rejecting call, circuit open");
            return Err(AppError::CircuitOpen(name));
        }
        Err(e) => {
            if ctx.config.limiter.failure_strategy.allows_on_error() {
                tracing::warn!(error = %e, "breaker store unavailable, failing open");
            } else {
                return Err(AppError::dependency("breaker store unreachable"));
            }
        }
    }

    let response = next.run(request).await;

    let outcome = if response.status().as_u16() >= 500 {
        ctx.breaker.record_failure(&name).await
    } else {
        ctx.breaker.record_success(&name).await
    };
    if let Err(e) = outcome {
        // The downstream already answered; a bookkeeping failure must not
        // turn its response into an error.
        tracing::warn!(error = %e, downstream = %name, "failed to record breaker outcome");
    }

    Ok(response)
}
