//! Key/value cache with per-entry expiry, backed by process memory or Redis.

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

pub use crate::errors::CacheError;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisCache;

/// Operations every cache backend provides.
///
/// Values are stored as JSON. An entry disappears on its own once `ttl`
/// has elapsed; a `ttl` of zero is rounded up to one second.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Store a value that expires after `ttl`
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Retrieve a value, `None` when missing or expired
    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError>;

    /// Delete a value, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Check that the backend is reachable
    async fn health_check(&self) -> Result<(), String>;
}

/// Cache selected at startup
#[derive(Clone)]
pub enum Cache {
    Memory(MemoryCache),
    #[cfg(feature = "redis")]
    Redis(RedisCache),
}

#[async_trait]
impl CacheBackend for Cache {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        match self {
            Self::Memory(cache) => cache.set(key, value, ttl).await,
            #[cfg(feature = "redis")]
            Self::Redis(cache) => cache.set(key, value, ttl).await,
        }
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        match self {
            Self::Memory(cache) => cache.get(key).await,
            #[cfg(feature = "redis")]
            Self::Redis(cache) => cache.get(key).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        match self {
            Self::Memory(cache) => cache.delete(key).await,
            #[cfg(feature = "redis")]
            Self::Redis(cache) => cache.delete(key).await,
        }
    }

    async fn health_check(&self) -> Result<(), String> {
        match self {
            Self::Memory(cache) => cache.health_check().await,
            #[cfg(feature = "redis")]
            Self::Redis(cache) => cache.health_check().await,
        }
    }
}

/// Create a Redis cache when a URL is configured, otherwise a process-local one
pub async fn create_cache(redis_url: Option<&str>) -> Result<Cache, CacheError> {
    match redis_url {
        #[cfg(feature = "redis")]
        Some(url) => Ok(Cache::Redis(RedisCache::new(url).await?)),
        #[cfg(not(feature = "redis"))]
        Some(_) => Err(CacheError::Config(
            "REDIS_URL is set but redis support is not compiled in".to_string(),
        )),
        None => Ok(Cache::Memory(MemoryCache::new())),
    }
}

/// Cache for tools running beside the server, which must see the server's entries.
///
/// A process-local cache would hide writes from the server, so a Redis URL is required.
pub async fn create_shared_cache(redis_url: Option<&str>) -> Result<Cache, CacheError> {
    match redis_url {
        Some(url) => create_cache(Some(url)).await,
        None => Err(CacheError::Config(
            "REDIS_URL must be set when the cache is enabled".to_string(),
        )),
    }
}

/// Whole seconds for a TTL, never less than one
pub(crate) fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}
