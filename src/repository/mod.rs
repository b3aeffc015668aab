//! Persistence contracts consumed by the core.
//!
//! Durable state lives behind these traits: key records and users. The
//! Postgres implementation is the production backend; the in-memory one
//! backs tests and secret-less development runs.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;

use crate::error::AppResult;
use models::{ApiKeyRecord, User};

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_user(&self, id: &str) -> AppResult<Option<User>>;
    async fn create_user(&self, user: User) -> AppResult<()>;
}

#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    async fn get_by_hash(&self, key_hash: &str) -> AppResult<Option<ApiKeyRecord>>;
    async fn list_by_user(&self, user_id: &str) -> AppResult<Vec<ApiKeyRecord>>;
    async fn create_api_key(&self, record: ApiKeyRecord) -> AppResult<()>;
    /// Marks every key owned by the user inactive. Deactivation is logical;
    /// records are never deleted.
    async fn invalidate_all(&self, user_id: &str) -> AppResult<()>;
}
