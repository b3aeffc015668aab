use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Positive-result cache for API-key verification.
///
/// Maps a key hash to the principal it verified as. Expiration is lazy:
/// entries past their deadline read as misses and are left for the next
/// `set` on the same hash to replace. Negative lookups are never stored
/// here; caching them would mask revocation.
pub struct VerifyCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl VerifyCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key_hash: &str) -> Option<String> {
        let entries = self.entries.read().expect("verify cache lock poisoned");
        let entry = entries.get(key_hash)?;
        if Instant::now() > entry.expires_at {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn set(&self, key_hash: &str, principal_id: &str, ttl: Duration) {
        let mut entries = self.entries.write().expect("verify cache lock poisoned");
        entries.insert(
            key_hash.to_string(),
            CacheEntry {
                value: principal_id.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn delete(&self, key_hash: &str) {
        let mut entries = self.entries.write().expect("verify cache lock poisoned");
        entries.remove(key_hash);
    }
}

impl Default for VerifyCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_what_set_stored() {
        let cache = VerifyCache::new();
        cache.set("hash-1", "user-1", Duration::from_secs(60));
        assert_eq!(cache.get("hash-1"), Some("user-1".to_string()));
    }

    #[test]
    fn missing_key_is_a_miss() {
        let cache = VerifyCache::new();
        assert_eq!(cache.get("nope"), None);
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let cache = VerifyCache::new();
        cache.set("hash-1", "user-1", Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("hash-1"), None);
    }

    #[test]
    fn delete_removes_immediately() {
        let cache = VerifyCache::new();
        cache.set("hash-1", "user-1", Duration::from_secs(60));
        cache.delete("hash-1");
        assert_eq!(cache.get("hash-1"), None);
    }

    #[test]
    fn set_replaces_existing_entry() {
        let cache = VerifyCache::new();
        cache.set("hash-1", "user-1", Duration::from_secs(60));
        cache.set("hash-1", "user-2", Duration::from_secs(60));
        assert_eq!(cache.get("hash-1"), Some("user-2".to_string()));
    }
}
