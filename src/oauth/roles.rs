//! Role lookup cache and role administration.

use crate::errors::{RoleError, StorageError};
use crate::oauth::invalidation::SessionGuard;
use crate::oauth::types::{Role, is_system_role, system_roles};
use crate::storage::CredentialStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// In-process snapshot of every role, refreshed explicitly
pub struct RoleCache {
    store: Arc<dyn CredentialStore>,
    roles: RwLock<HashMap<String, Role>>,
}

impl RoleCache {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            roles: RwLock::new(HashMap::new()),
        }
    }

    /// Reload all roles from the store, returning how many were loaded
    pub async fn refresh(&self) -> Result<usize, StorageError> {
        let roles = self.store.list_roles().await?;
        let count = roles.len();

        let mut cached = self.roles.write().await;
        *cached = roles.into_iter().map(|role| (role.id.clone(), role)).collect();

        tracing::debug!(count, "Role cache refreshed");
        Ok(count)
    }

    pub async fn get(&self, role_id: &str) -> Option<Role> {
        self.roles.read().await.get(role_id).cloned()
    }

    /// Scope attached to a role; unknown roles carry none
    pub async fn scope_of(&self, role_id: &str) -> Vec<String> {
        self.roles
            .read()
            .await
            .get(role_id)
            .map(|role| role.scope.clone())
            .unwrap_or_default()
    }

    /// All cached roles ordered by ranking
    pub async fn all(&self) -> Vec<Role> {
        let mut roles: Vec<_> = self.roles.read().await.values().cloned().collect();
        roles.sort_by_key(|role| role.ranking);
        roles
    }
}

/// Refresh `roles` every `interval` until `token` is cancelled
pub fn spawn_refresh_task(
    roles: Arc<RoleCache>,
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
                    if let Err(err) = roles.refresh().await {
                        tracing::error!(error = ?err, "Failed to refresh role cache");
                    }
                }
            }
        }

        tracing::info!("Role cache refresh task stopped");
    });
}

/// Role administration with system role protection
pub struct RoleService {
    store: Arc<dyn CredentialStore>,
    roles: Arc<RoleCache>,
    guard: Arc<SessionGuard>,
}

impl RoleService {
    pub fn new(store: Arc<dyn CredentialStore>, roles: Arc<RoleCache>, guard: Arc<SessionGuard>) -> Self {
        Self {
            store,
            roles,
            guard,
        }
    }

    /// Create missing system roles; existing roles keep their scope
    pub async fn seed_system_roles(&self) -> Result<usize, RoleError> {
        let mut created = 0;
        for role in system_roles() {
            if self.store.get_role(&role.id).await?.is_none() {
                self.store.store_role(&role).await?;
                tracing::info!(role_id = %role.id, "Seeded system role");
                created += 1;
            }
        }

        self.roles.refresh().await?;
        Ok(created)
    }

    /// Create or update a role.
    ///
    /// System roles only accept changes to name, ranking, and description.
    /// A scope change on any other role invalidates tokens bound to it.
    pub async fn save_role(&self, role: Role) -> Result<Role, RoleError> {
        let existing = self.store.get_role(&role.id).await?;

        let scope_changed = existing
            .as_ref()
            .is_some_and(|existing| existing.scope != role.scope);

        if role.is_system_role() {
            if let Some(existing) = &existing {
                if existing.scope != role.scope || existing.kind != role.kind {
                    return Err(RoleError::SystemRoleScope(role.id));
                }
            }
        }

        self.store.store_role(&role).await?;
        if scope_changed {
            self.guard.invalidate_role(&role.id).await?;
        }
        self.roles.refresh().await?;

        Ok(role)
    }

    /// Replace the scope of a non-system role
    pub async fn change_scope(&self, role_id: &str, scope: Vec<String>) -> Result<Role, RoleError> {
        if is_system_role(role_id) {
            return Err(RoleError::SystemRoleScope(role_id.to_string()));
        }

        let mut role = self
            .store
            .get_role(role_id)
            .await?
            .ok_or_else(|| RoleError::NotFound(role_id.to_string()))?;
        role.scope = scope;

        self.save_role(role).await
    }

    pub async fn delete_role(&self, role_id: &str) -> Result<(), RoleError> {
        if is_system_role(role_id) {
            return Err(RoleError::SystemRoleDeletion(role_id.to_string()));
        }

        self.store.delete_role(role_id).await?;
        self.guard.invalidate_role(role_id).await?;
        self.roles.refresh().await?;
        Ok(())
    }
}
