use super::{CacheBackend, CacheError, ttl_seconds};
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Process-local cache; entries are dropped lazily once expired
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove all expired entries
    pub async fn cleanup(&self) -> usize {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let initial_count = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        initial_count - entries.len()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let serialized = serde_json::to_string(value)?;
        let expires_at = Instant::now() + Duration::from_secs(ttl_seconds(ttl));
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value: serialized,
                expires_at,
            },
        );
        Ok(())
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => serde_json::from_str(&entry.value)
                .map(Some)
                .map_err(|e| CacheError::Deserialization(key.to_string(), e.to_string())),
            _ => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let removed = self.entries.write().await.remove(key);
        Ok(removed.is_some_and(|entry| !entry.is_expired(Instant::now())))
    }

    async fn health_check(&self) -> Result<(), String> {
        Ok(())
    }
}
