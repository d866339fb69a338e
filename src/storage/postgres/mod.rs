//! PostgreSQL storage implementations
//!
//! This module provides PostgreSQL-based implementations of all storage traits.
//! PostgreSQL is suitable for production deployments with high availability requirements.

mod authorization_codes;
mod clients;
mod roles;
mod tokens;
mod users;

use crate::errors::StorageError;
use crate::oauth::types::*;
use crate::storage::traits::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgRow};
use std::sync::Arc;

pub use authorization_codes::PostgresAuthorizationCodeStore;
pub use clients::PostgresClientStore;
pub use roles::PostgresRoleStore;
pub use tokens::PostgresTokenStore;
pub use users::PostgresUserStore;

/// Read a column, mapping decode failures to a storage error
pub(crate) fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| StorageError::DatabaseError(format!("Failed to get {}: {}", name, e)))
}

/// Scope lists are stored space separated
pub(crate) fn join_scope(scope: &[String]) -> String {
    scope.join(" ")
}

/// PostgreSQL credential store composed of per-table stores
pub struct PostgresCredentialStore {
    pool: PgPool,
    user_store: Arc<PostgresUserStore>,
    client_store: Arc<PostgresClientStore>,
    role_store: Arc<PostgresRoleStore>,
    token_store: Arc<PostgresTokenStore>,
    authorization_code_store: Arc<PostgresAuthorizationCodeStore>,
}

impl PostgresCredentialStore {
    /// Create a new PostgreSQL credential store
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_store: Arc::new(PostgresUserStore::new(pool.clone())),
            client_store: Arc::new(PostgresClientStore::new(pool.clone())),
            role_store: Arc::new(PostgresRoleStore::new(pool.clone())),
            token_store: Arc::new(PostgresTokenStore::new(pool.clone())),
            authorization_code_store: Arc::new(PostgresAuthorizationCodeStore::new(pool.clone())),
            pool,
        }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations/postgres")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(format!("Migration failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for PostgresCredentialStore {
    async fn store_user(&self, user: &User) -> Result<()> {
        self.user_store.store_user(user).await
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        self.user_store.get_user(user_id).await
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.user_store.get_user_by_username(username).await
    }

    async fn set_global_logout(&self, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.user_store.set_global_logout(user_id, at).await
    }
}

#[async_trait]
impl ClientStore for PostgresCredentialStore {
    async fn store_client(&self, client: &Client) -> Result<()> {
        self.client_store.store_client(client).await
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<Client>> {
        self.client_store.get_client(client_id).await
    }

    async fn delete_client(&self, client_id: &str) -> Result<()> {
        self.client_store.delete_client(client_id).await
    }

    async fn list_clients(&self, limit: Option<usize>) -> Result<Vec<Client>> {
        self.client_store.list_clients(limit).await
    }
}

#[async_trait]
impl RoleStore for PostgresCredentialStore {
    async fn store_role(&self, role: &Role) -> Result<()> {
        self.role_store.store_role(role).await
    }

    async fn get_role(&self, role_id: &str) -> Result<Option<Role>> {
        self.role_store.get_role(role_id).await
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        self.role_store.list_roles().await
    }

    async fn delete_role(&self, role_id: &str) -> Result<()> {
        self.role_store.delete_role(role_id).await
    }

    async fn set_role_invalidated_at(&self, role_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.role_store.set_role_invalidated_at(role_id, at).await
    }

    async fn get_role_invalidated_at(&self, role_id: &str) -> Result<Option<DateTime<Utc>>> {
        self.role_store.get_role_invalidated_at(role_id).await
    }
}

#[async_trait]
impl TokenStore for PostgresCredentialStore {
    async fn store_token(&self, token: &Token) -> Result<()> {
        self.token_store.store_token(token).await
    }

    async fn find_by_access_token(&self, access_token: &str) -> Result<Option<Token>> {
        self.token_store.find_by_access_token(access_token).await
    }

    async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Token>> {
        self.token_store.find_by_refresh_token(refresh_token).await
    }

    async fn delete_by_access_token(&self, access_token: &str) -> Result<u64> {
        self.token_store.delete_by_access_token(access_token).await
    }

    async fn delete_by_refresh_token(&self, refresh_token: &str) -> Result<u64> {
        self.token_store.delete_by_refresh_token(refresh_token).await
    }

    async fn cleanup_expired_tokens(&self) -> Result<usize> {
        self.token_store.cleanup_expired_tokens().await
    }
}

#[async_trait]
impl AuthorizationCodeStore for PostgresCredentialStore {
    async fn store_code(&self, code: &AuthorizationCode) -> Result<()> {
        self.authorization_code_store.store_code(code).await
    }

    async fn find_code(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        self.authorization_code_store.find_code(code).await
    }

    async fn delete_code(&self, code: &str) -> Result<u64> {
        self.authorization_code_store.delete_code(code).await
    }

    async fn cleanup_expired_codes(&self) -> Result<usize> {
        self.authorization_code_store.cleanup_expired_codes().await
    }
}
