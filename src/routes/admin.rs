use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::auth;
use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::policy::Policy;
use crate::repository::models::User;
use crate::routes::middleware::Principal;

#[derive(Debug, Deserialize)]
pub struct ReloadRequest {
    #[serde(default)]
    pub policies: Vec<Policy>,
    pub default_rate_limit: Option<f64>,
    pub default_burst: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub message: &'static str,
    pub policies_loaded: usize,
}

/// POST /api/admin/reload: replaces the policy set and/or the fallback
/// limits atomically.
pub async fn reload_policies(
    State(ctx): State<Arc<AppContext>>,
    principal: Option<Extension<Principal>>,
    Json(body): Json<ReloadRequest>,
) -> AppResult<Json<ReloadResponse>> {
    let count = body.policies.len();
    if count > 0 {
        ctx.policy_engine.load_policies(body.policies)?;
    }

    if let (Some(rate), Some(burst)) = (body.default_rate_limit, body.default_burst) {
        ctx.policy_engine.set_default_limits(rate, burst)?;
    }

    audit_admin_action(&ctx, principal, "policy_reload", "config", Map::new());

    Ok(Json(ReloadResponse {
        message: "Configuration updated successfully",
        policies_loaded: count,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateKeyResponse {
    /// Shown exactly once; only the hash is stored.
    pub api_key: String,
    pub prefix: String,
}

/// POST /api/admin/keys/create: mints a key for a user.
pub async fn create_api_key(
    State(ctx): State<Arc<AppContext>>,
    principal: Option<Extension<Principal>>,
    Json(body): Json<CreateKeyRequest>,
) -> AppResult<Json<CreateKeyResponse>> {
    if body.user_id.is_empty() {
        return Err(AppError::Validation("user_id must not be empty".into()));
    }

    let (raw_key, record) = ctx
        .api_keys
        .create_api_key(&body.user_id, &body.name, body.scopes)
        .await?;

    let mut metadata = Map::new();
    metadata.insert("target_user".into(), Value::String(body.user_id.clone()));
    metadata.insert("key_name".into(), Value::String(body.name.clone()));
    audit_admin_action(
        &ctx,
        principal,
        "key_create",
        &format!("apikey:{}", body.user_id),
        metadata,
    );

    Ok(Json(CreateKeyResponse {
        api_key: raw_key,
        prefix: record.prefix,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RotateKeyRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct RotateKeyResponse {
    pub api_key: String,
    pub message: &'static str,
}

/// POST /api/admin/keys/rotate: revokes every key the user owns and mints
/// a replacement.
pub async fn rotate_api_key(
    State(ctx): State<Arc<AppContext>>,
    principal: Option<Extension<Principal>>,
    Json(body): Json<RotateKeyRequest>,
) -> AppResult<Json<RotateKeyResponse>> {
    if body.user_id.is_empty() {
        return Err(AppError::Validation("user_id must not be empty".into()));
    }

    let raw_key = ctx.api_keys.rotate_api_key(&body.user_id).await?;

    let mut metadata = Map::new();
    metadata.insert("target_user".into(), Value::String(body.user_id.clone()));
    audit_admin_action(
        &ctx,
        principal,
        "key_rotate",
        &format!("apikey:{}", body.user_id),
        metadata,
    );

    Ok(Json(RotateKeyResponse {
        api_key: raw_key,
        message: "All previous keys revoked",
    }))
}

/// GET /api/admin/policies: current policy set.
pub async fn list_policies(State(ctx): State<Arc<AppContext>>) -> Json<Vec<Policy>> {
    Json(ctx.policy_engine.list_policies().as_ref().clone())
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub id: String,
    pub username: String,
}

/// POST /api/admin/users/create: registers a user the key flows can own
/// records against. The password is bcrypt-hashed before it reaches the
/// repository.
pub async fn create_user(
    State(ctx): State<Arc<AppContext>>,
    principal: Option<Extension<Principal>>,
    Json(body): Json<CreateUserRequest>,
) -> AppResult<Json<CreateUserResponse>> {
    if body.username.is_empty() || body.password.is_empty() {
        return Err(AppError::Validation(
            "username and password must not be empty".into(),
        ));
    }

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        username: body.username.clone(),
        password_hash: auth::hash_password(&body.password)?,
        created_at: now,
        updated_at: now,
    };
    let response = CreateUserResponse {
        id: user.id.clone(),
        username: user.username.clone(),
    };

    ctx.users.create_user(user).await?;

    let mut metadata = Map::new();
    metadata.insert("username".into(), Value::String(body.username));
    audit_admin_action(
        &ctx,
        principal,
        "user_create",
        &format!("user:{}", response.id),
        metadata,
    );

    Ok(Json(response))
}

/// GET /api/admin/users/:id: fetches a user record. The password hash is
/// never serialized.
pub async fn get_user(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> AppResult<Json<User>> {
    ctx.users
        .get_user(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("user {}", id)))
}

fn audit_admin_action(
    ctx: &AppContext,
    principal: Option<Extension<Principal>>,
    action: &str,
    resource: &str,
    metadata: Map<String, Value>,
) {
    let actor_id = principal
        .map(|Extension(p)| p.principal_id)
        .unwrap_or_else(|| "anonymous".to_string());

    ctx.audit.log(AuditEntry {
        timestamp: chrono::Utc::now(),
        tenant_id: "default".to_string(),
        actor_id,
        action: action.to_string(),
        resource: resource.to_string(),
        status: 200,
        metadata,
    });
}
