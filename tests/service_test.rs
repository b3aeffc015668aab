//! API-key lifecycle tests over the in-memory repository: hash round trip,
//! rotation, and cache behavior.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use api_control_plane::auth;
use api_control_plane::error::{AppError, AppResult};
use api_control_plane::keys::ApiKeyService;
use api_control_plane::repository::memory::MemoryRepository;
use api_control_plane::repository::models::ApiKeyRecord;
use api_control_plane::repository::ApiKeyRepository;

/// Wraps the memory repository and counts hash lookups, to prove the cache
/// elides repository traffic.
struct CountingRepo {
    inner: MemoryRepository,
    get_calls: AtomicUsize,
}

impl CountingRepo {
    fn new() -> Self {
        Self {
            inner: MemoryRepository::new(),
            get_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ApiKeyRepository for CountingRepo {
    async fn get_by_hash(&self, key_hash: &str) -> AppResult<Option<ApiKeyRecord>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_by_hash(key_hash).await
    }

    async fn list_by_user(&self, user_id: &str) -> AppResult<Vec<ApiKeyRecord>> {
        self.inner.list_by_user(user_id).await
    }

    async fn create_api_key(&self, record: ApiKeyRecord) -> AppResult<()> {
        self.inner.create_api_key(record).await
    }

    async fn invalidate_all(&self, user_id: &str) -> AppResult<()> {
        self.inner.invalidate_all(user_id).await
    }
}

fn service() -> ApiKeyService {
    ApiKeyService::new(Arc::new(MemoryRepository::new()), Duration::from_secs(60))
}

#[tokio::test]
async fn created_key_verifies_to_its_owner() {
    let svc = service();

    let (raw, record) = svc.create_api_key("user-123", "ci-key", vec![]).await.unwrap();
    assert_eq!(record.prefix, &raw[..7]);
    assert!(record.is_active);

    let principal = svc.verify_api_key(&raw).await.unwrap();
    assert_eq!(principal, "user-123");
}

#[tokio::test]
async fn a_different_key_never_verifies() {
    let svc = service();
    svc.create_api_key("user-123", "ci-key", vec![]).await.unwrap();

    let (other_raw, _, _) = auth::generate_api_key();
    let err = svc.verify_api_key(&other_raw).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidCredential));
}

#[tokio::test]
async fn rotation_invalidates_every_previous_key() {
    let svc = service();
    let user = "user-123";

    let (key1, _) = svc.create_api_key(user, "initial-key", vec![]).await.unwrap();
    assert_eq!(svc.verify_api_key(&key1).await.unwrap(), user);

    let key2 = svc.rotate_api_key(user).await.unwrap();
    assert_ne!(key1, key2);

    // Clear the local positive cache so the next check hits the repository;
    // multi-instance deployments rely on the cache TTL instead.
    svc.forget_key(&key1);

    let err = svc.verify_api_key(&key1).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidCredential));

    assert_eq!(svc.verify_api_key(&key2).await.unwrap(), user);
}

#[tokio::test]
async fn back_to_back_verifications_hit_the_repository_once() {
    let repo = Arc::new(CountingRepo::new());
    let svc = ApiKeyService::new(repo.clone(), Duration::from_secs(60));

    let (raw, _) = svc.create_api_key("user-cache", "cache-key", vec![]).await.unwrap();

    svc.verify_api_key(&raw).await.unwrap();
    assert_eq!(repo.get_calls.load(Ordering::SeqCst), 1);

    svc.verify_api_key(&raw).await.unwrap();
    assert_eq!(repo.get_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_verifications_are_not_cached() {
    let repo = Arc::new(CountingRepo::new());
    let svc = ApiKeyService::new(repo.clone(), Duration::from_secs(60));

    let (unknown, _, _) = auth::generate_api_key();
    assert!(svc.verify_api_key(&unknown).await.is_err());
    assert!(svc.verify_api_key(&unknown).await.is_err());

    // A cached negative would have stopped the second lookup.
    assert_eq!(repo.get_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn expired_records_are_rejected() {
    let repo = Arc::new(MemoryRepository::new());
    let svc = ApiKeyService::new(repo.clone(), Duration::from_secs(60));

    let (raw, key_hash, prefix) = auth::generate_api_key();
    repo.create_api_key(ApiKeyRecord {
        id: uuid::Uuid::new_v4(),
        user_id: "user-expired".to_string(),
        key_hash,
        prefix,
        name: "stale".to_string(),
        scopes: vec![],
        created_at: chrono::Utc::now() - chrono::Duration::days(30),
        expires_at: Some(chrono::Utc::now() - chrono::Duration::days(1)),
        is_active: true,
    })
    .await
    .unwrap();

    let err = svc.verify_api_key(&raw).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidCredential));
}

#[tokio::test]
async fn cache_expiry_forces_a_fresh_lookup() {
    let repo = Arc::new(CountingRepo::new());
    let svc = ApiKeyService::new(repo.clone(), Duration::from_millis(10));

    let (raw, _) = svc.create_api_key("user-ttl", "short-ttl", vec![]).await.unwrap();

    svc.verify_api_key(&raw).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    svc.verify_api_key(&raw).await.unwrap();

    assert_eq!(repo.get_calls.load(Ordering::SeqCst), 2);
}
