//! Token invalidation without enumeration: global logout and role revocation.
//!
//! Both mechanisms store a single timestamp. A token registered before that
//! timestamp is dead even though its record still exists.

use crate::cache::{Cache, CacheBackend};
use crate::errors::StorageError;
use crate::oauth::types::User;
use crate::storage::CredentialStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

fn user_key(user_id: &str) -> String {
    format!("user:{}", user_id)
}

fn role_invalidated_key(role_id: &str) -> String {
    format!("role-invalidated:{}", role_id)
}

/// True iff the user logged out everywhere strictly after `since`
pub fn is_token_invalidated(global_logout_at: Option<DateTime<Utc>>, since: DateTime<Utc>) -> bool {
    global_logout_at.is_some_and(|at| at > since)
}

/// Liveness checks backed by the credential store, read through the cache when enabled
pub struct SessionGuard {
    store: Arc<dyn CredentialStore>,
    cache: Option<Cache>,
    /// How long cached users and invalidation stamps live
    cache_ttl: Duration,
}

impl SessionGuard {
    pub fn new(store: Arc<dyn CredentialStore>, cache: Option<Cache>, cache_ttl: Duration) -> Self {
        Self {
            store,
            cache,
            cache_ttl,
        }
    }

    /// True iff the role's scope changed strictly after `since`
    pub async fn is_role_invalidated(
        &self,
        role_id: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        Ok(self
            .role_invalidated_at(role_id)
            .await?
            .is_some_and(|at| at > since))
    }

    async fn role_invalidated_at(&self, role_id: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        let key = role_invalidated_key(role_id);
        if let Some(cache) = &self.cache {
            if let Some(at) = cache.get::<DateTime<Utc>>(&key).await.inspect_err(|err| {
                tracing::error!(role_id, error = ?err, "Failed to read role invalidation from cache");
            })? {
                return Ok(Some(at));
            }
        }

        let at = self
            .store
            .get_role_invalidated_at(role_id)
            .await
            .inspect_err(|err| {
                tracing::error!(role_id, error = ?err, "Failed to read role invalidation");
            })?;

        if let (Some(cache), Some(at)) = (&self.cache, at) {
            cache.set(&key, &at, self.cache_ttl).await?;
        }
        Ok(at)
    }

    /// Load a user, consulting the cache first and back-filling it on a miss
    pub async fn get_user_info(&self, user_id: &str) -> Result<Option<User>, StorageError> {
        let key = user_key(user_id);
        if let Some(cache) = &self.cache {
            if let Some(user) = cache.get::<User>(&key).await.inspect_err(|err| {
                tracing::error!(user_id, error = ?err, "Failed to read user from cache");
            })? {
                return Ok(Some(user));
            }
        }

        let user = self.store.get_user(user_id).await.inspect_err(|err| {
            tracing::error!(user_id, error = ?err, "Failed to load user");
        })?;

        if let (Some(cache), Some(user)) = (&self.cache, &user) {
            cache.set(&key, user, self.cache_ttl).await?;
        }
        Ok(user)
    }

    /// Kill every token the user holds by moving their logout mark to now
    pub async fn logout_everywhere(&self, user_id: &str) -> Result<DateTime<Utc>, StorageError> {
        let now = Utc::now();
        self.store.set_global_logout(user_id, now).await?;

        if let Some(cache) = &self.cache {
            match self.store.get_user(user_id).await? {
                Some(user) => cache.set(&user_key(user_id), &user, self.cache_ttl).await?,
                None => {
                    cache.delete(&user_key(user_id)).await?;
                }
            }
        }

        tracing::info!(user_id, "User logged out everywhere");
        Ok(now)
    }

    /// Kill every token bound to the role by stamping it invalidated now
    pub async fn invalidate_role(&self, role_id: &str) -> Result<DateTime<Utc>, StorageError> {
        let now = Utc::now();
        self.store.set_role_invalidated_at(role_id, now).await?;

        if let Some(cache) = &self.cache {
            cache
                .set(&role_invalidated_key(role_id), &now, self.cache_ttl)
                .await?;
        }

        tracing::info!(role_id, "Role invalidated");
        Ok(now)
    }
}
