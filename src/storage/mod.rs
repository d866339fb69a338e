//! Trait-based storage abstractions with in-memory and PostgreSQL backends.

pub mod inmemory;
pub mod traits;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use inmemory::MemoryCredentialStore;
pub use traits::*;

#[cfg(feature = "postgres")]
pub use postgres::PostgresCredentialStore;

use crate::cache::Cache;
use crate::errors::StorageError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Storage backend configuration and factory
#[derive(Clone)]
pub enum StorageBackend {
    Memory,
    #[cfg(feature = "postgres")]
    Postgres(String), // Connection string
}

/// Create a storage backend based on configuration
pub async fn create_storage_backend(
    backend: StorageBackend,
) -> std::result::Result<Arc<dyn CredentialStore>, StorageError> {
    match backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryCredentialStore::new())),
        #[cfg(feature = "postgres")]
        StorageBackend::Postgres(database_url) => {
            let pool = sqlx::postgres::PgPool::connect(&database_url)
                .await
                .map_err(|e| {
                    StorageError::ConnectionFailed(format!("PostgreSQL connection failed: {}", e))
                })?;

            let storage = PostgresCredentialStore::new(pool);
            storage.migrate().await?;

            Ok(Arc::new(storage))
        }
    }
}

/// Parse storage backend from configuration string
pub fn parse_storage_backend(
    backend_name: &str,
    database_url: Option<&str>,
) -> std::result::Result<StorageBackend, StorageError> {
    match backend_name {
        "memory" => Ok(StorageBackend::Memory),
        #[cfg(feature = "postgres")]
        "postgres" => {
            let url = database_url.ok_or_else(|| {
                StorageError::InvalidData("DATABASE_URL required for postgres backend".to_string())
            })?;
            Ok(StorageBackend::Postgres(url.to_string()))
        }
        _ => {
            let _ = database_url;
            Err(StorageError::InvalidData(format!(
                "Unknown storage backend: {}",
                backend_name
            )))
        }
    }
}

/// Remove expired tokens and codes from the store and expired entries from a process-local cache
pub async fn sweep_expired(
    store: &dyn CredentialStore,
    cache: &Cache,
) -> std::result::Result<usize, StorageError> {
    let tokens = store.cleanup_expired_tokens().await?;
    let codes = store.cleanup_expired_codes().await?;
    let entries = match cache {
        Cache::Memory(cache) => cache.cleanup().await,
        #[cfg(feature = "redis")]
        Cache::Redis(_) => 0,
    };

    if tokens + codes + entries > 0 {
        tracing::info!(tokens, codes, entries, "Expired credentials removed");
    }
    Ok(tokens + codes + entries)
}

/// Run [`sweep_expired`] every `interval` until `token` is cancelled
pub fn spawn_cleanup_task(
    store: Arc<dyn CredentialStore>,
    cache: Cache,
    interval: Duration,
    tracker: &TaskTracker,
    token: CancellationToken,
) {
    tracker.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = sweep_expired(store.as_ref(), &cache).await {
                        tracing::error!(error = ?err, "Failed to remove expired credentials");
                    }
                }
            }
        }

        tracing::info!("Cleanup task stopped");
    });
}
