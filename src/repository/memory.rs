use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::models::{ApiKeyRecord, User};
use super::{ApiKeyRepository, UserRepository};
use crate::error::AppResult;

/// In-memory repository double. Keys are indexed by hash, matching the only
/// lookup the verification path performs.
pub struct MemoryRepository {
    users: RwLock<HashMap<String, User>>,
    api_keys: RwLock<HashMap<String, ApiKeyRecord>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            api_keys: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserRepository for MemoryRepository {
    async fn get_user(&self, id: &str) -> AppResult<Option<User>> {
        let users = self.users.read().expect("memory repo lock poisoned");
        Ok(users.get(id).cloned())
    }

    async fn create_user(&self, user: User) -> AppResult<()> {
        let mut users = self.users.write().expect("memory repo lock poisoned");
        users.insert(user.id.clone(), user);
        Ok(())
    }
}

#[async_trait]
impl ApiKeyRepository for MemoryRepository {
    async fn get_by_hash(&self, key_hash: &str) -> AppResult<Option<ApiKeyRecord>> {
        let keys = self.api_keys.read().expect("memory repo lock poisoned");
        Ok(keys.get(key_hash).cloned())
    }

    async fn list_by_user(&self, user_id: &str) -> AppResult<Vec<ApiKeyRecord>> {
        let keys = self.api_keys.read().expect("memory repo lock poisoned");
        Ok(keys
            .values()
            .filter(|k| k.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn create_api_key(&self, record: ApiKeyRecord) -> AppResult<()> {
        let mut keys = self.api_keys.write().expect("memory repo lock poisoned");
        keys.insert(record.key_hash.clone(), record);
        Ok(())
    }

    async fn invalidate_all(&self, user_id: &str) -> AppResult<()> {
        let mut keys = self.api_keys.write().expect("memory repo lock poisoned");
        for record in keys.values_mut() {
            if record.user_id == user_id {
                record.is_active = false;
            }
        }
        Ok(())
    }
}
