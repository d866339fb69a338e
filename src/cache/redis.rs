use super::{CacheBackend, CacheError, ttl_seconds};
use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Connection, Pool, Runtime};
use redis::AsyncCommands;
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

/// Redis-backed cache sharing a connection pool
#[derive(Clone)]
pub struct RedisCache {
    pool: Pool,
}

impl RedisCache {
    /// Build the pool and make sure the server answers
    pub async fn new(redis_url: &str) -> Result<Self, CacheError> {
        let pool = PoolConfig::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::Config(format!("Failed to create Redis pool: {}", e)))?;

        let cache = Self { pool };
        cache.health_check().await.map_err(CacheError::Config)?;
        Ok(cache)
    }

    async fn connection(&self) -> Result<Connection, CacheError> {
        self.pool.get().await.map_err(|err| {
            tracing::error!(error = ?err, "Failed to get Redis connection");
            CacheError::Redis(err.to_string())
        })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let serialized = serde_json::to_string(value)?;
        let mut conn = self.connection().await?;

        conn.set_ex::<_, _, ()>(key, serialized, ttl_seconds(ttl))
            .await
            .map_err(|err| {
                tracing::error!(key, error = ?err, "Redis error while setting key");
                CacheError::Redis(err.to_string())
            })
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        let mut conn = self.connection().await?;

        let value: Option<String> = conn.get(key).await.map_err(|err| {
            tracing::error!(key, error = ?err, "Redis error while getting key");
            CacheError::Redis(err.to_string())
        })?;

        value
            .map(|value| {
                serde_json::from_str(&value)
                    .map_err(|e| CacheError::Deserialization(key.to_string(), e.to_string()))
            })
            .transpose()
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;

        let removed: u64 = conn.del(key).await.map_err(|err| {
            tracing::error!(key, error = ?err, "Redis error while deleting key");
            CacheError::Redis(err.to_string())
        })?;
        Ok(removed > 0)
    }

    async fn health_check(&self) -> Result<(), String> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| format!("Redis health check failed: {}", e))?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| format!("Redis health check failed: {}", e))
    }
}
