use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::auth;
use crate::cache::VerifyCache;
use crate::error::{AppError, AppResult};
use crate::repository::models::ApiKeyRecord;
use crate::repository::ApiKeyRepository;

/// API-key verification service.
///
/// Verification consults a per-process positive-result cache before the
/// repository; only successful verifications are cached. After a rotation,
/// other processes may honor an old key until their cache TTL elapses;
/// single-process deployments accept that window.
pub struct ApiKeyService {
    repo: Arc<dyn ApiKeyRepository>,
    cache: VerifyCache,
    cache_ttl: Duration,
}

impl ApiKeyService {
    pub fn new(repo: Arc<dyn ApiKeyRepository>, cache_ttl: Duration) -> Self {
        Self {
            repo,
            cache: VerifyCache::new(),
            cache_ttl,
        }
    }

    /// Verifies a raw API key and returns the owning principal id.
    ///
    /// Unknown, inactive, and expired keys all map to `InvalidCredential`
    /// and are never cached.
    pub async fn verify_api_key(&self, raw_key: &str) -> AppResult<String> {
        let key_hash = auth::hash_api_key(raw_key);

        if let Some(principal_id) = self.cache.get(&key_hash) {
            return Ok(principal_id);
        }

        let record = self
            .repo
            .get_by_hash(&key_hash)
            .await?
            .ok_or(AppError::InvalidCredential)?;

        if !record.is_active {
            return Err(AppError::InvalidCredential);
        }
        if let Some(expires_at) = record.expires_at {
            if expires_at < Utc::now() {
                return Err(AppError::InvalidCredential);
            }
        }

        self.cache.set(&key_hash, &record.user_id, self.cache_ttl);
        Ok(record.user_id)
    }

    /// Mints a new key for the user. The raw key in the returned pair is
    /// shown exactly once; only its hash and clear prefix are stored.
    pub async fn create_api_key(
        &self,
        user_id: &str,
        name: &str,
        scopes: Vec<String>,
    ) -> AppResult<(String, ApiKeyRecord)> {
        let (raw_key, key_hash, prefix) = auth::generate_api_key();

        let record = ApiKeyRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            key_hash,
            prefix,
            name: name.to_string(),
            scopes,
            created_at: Utc::now(),
            expires_at: None,
            is_active: true,
        };

        self.repo.create_api_key(record.clone()).await?;
        Ok((raw_key, record))
    }

    /// Invalidates every key the user owns, then mints a replacement.
    pub async fn rotate_api_key(&self, user_id: &str) -> AppResult<String> {
        self.repo.invalidate_all(user_id).await?;

        let (raw_key, _) = self.create_api_key(user_id, "rotated-key", vec![]).await?;
        Ok(raw_key)
    }

    /// Drops a raw key's cache entry. Lets callers that know about a
    /// rotation shortcut the TTL instead of waiting it out.
    pub fn forget_key(&self, raw_key: &str) {
        self.cache.delete(&auth::hash_api_key(raw_key));
    }
}
