pub mod admin;
pub mod middleware;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::context::AppContext;
use crate::error::AppResult;
use crate::metrics::Stats;
use crate::routes::middleware::Principal;

/// Assembles the router and the decorator stack.
///
/// ServiceBuilder applies layers top-to-bottom, so the list below reads
/// outermost-first: metrics observe every outcome including auth rejections,
/// policy is attached before auth so auth can read `auth_required`, and the
/// limiter sees the authenticated principal. The circuit breaker wraps only
/// the downstream call it guards.
pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let downstream = Router::new()
        .route("/api/unstable", get(unstable))
        .route_layer(from_fn_with_state(
            ctx.clone(),
            middleware::guard_downstream,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(prometheus_metrics))
        .route("/api/metrics", get(metrics_snapshot))
        .route("/api/public/hello", get(public_hello))
        .route("/api/whoami", get(whoami))
        .route("/api/test/generate-key", post(generate_test_key))
        .route("/api/admin/reload", post(admin::reload_policies))
        .route("/api/admin/policies", get(admin::list_policies))
        .route("/api/admin/keys/create", post(admin::create_api_key))
        .route("/api/admin/keys/rotate", post(admin::rotate_api_key))
        .route("/api/admin/users/create", post(admin::create_user))
        .route("/api/admin/users/:id", get(admin::get_user))
        .merge(downstream)
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(ctx.config.request_timeout))
                .layer(from_fn_with_state(ctx.clone(), middleware::record_metrics))
                .layer(from_fn_with_state(ctx.clone(), middleware::audit_trail))
                .layer(from_fn_with_state(ctx.clone(), middleware::secure_headers))
                .layer(from_fn_with_state(ctx.clone(), middleware::resolve_policy))
                .layer(from_fn_with_state(ctx.clone(), middleware::authenticate))
                .layer(from_fn_with_state(
                    ctx.clone(),
                    middleware::enforce_rate_limit,
                )),
        )
        .with_state(ctx)
}

async fn health() -> &'static str {
    "OK"
}

/// Readiness: the plane is ready when its shared store answers.
async fn ready(State(ctx): State<Arc<AppContext>>) -> Response {
    let Some(conn) = ctx.redis.clone() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Store Not Configured").into_response();
    };

    let ping = async move {
        let mut conn = conn;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok::<_, redis::RedisError>(pong)
    };
    match tokio::time::timeout(std::time::Duration::from_secs(2), ping).await {
        Ok(Ok(_)) => (StatusCode::OK, "Ready").into_response(),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "Store Unavailable").into_response(),
    }
}

async fn public_hello() -> &'static str {
    "Hello Public World"
}

async fn whoami(principal: Option<Extension<Principal>>) -> Response {
    match principal {
        Some(Extension(p)) => format!("Hello, User {}!", p.principal_id).into_response(),
        None => (StatusCode::OK, "Hello, anonymous!").into_response(),
    }
}

/// Downstream demo wrapped by the circuit breaker: 500 on demand.
async fn unstable(Query(params): Query<HashMap<String, String>>) -> Response {
    if params.get("fail").map(String::as_str) == Some("true") {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
    }
    "Stable".into_response()
}

/// Test-only convenience for minting a key without the admin flow.
async fn generate_test_key(
    State(ctx): State<Arc<AppContext>>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<String> {
    let user_id = params
        .get("user_id")
        .map(String::as_str)
        .unwrap_or("test-user");

    let (raw_key, _) = ctx
        .api_keys
        .create_api_key(user_id, "test-key", vec![])
        .await?;
    Ok(raw_key)
}

async fn metrics_snapshot(State(ctx): State<Arc<AppContext>>) -> Json<Stats> {
    Json(ctx.metrics.snapshot())
}

async fn prometheus_metrics() -> Response {
    match crate::metrics::gather_metrics() {
        Ok(body) => body.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "metrics exposition failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "No matching route found").into_response()
}
