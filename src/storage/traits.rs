//! Storage trait definitions for the credential store.
//!
//! Defines async storage interfaces for users, clients, roles, tokens, and
//! authorization codes that can be implemented by various backend providers.

use crate::errors::StorageError;
use crate::oauth::types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub type Result<T> = std::result::Result<T, StorageError>;

/// Trait for storing and retrieving user accounts
#[async_trait]
pub trait UserStore {
    /// Store or replace a user
    async fn store_user(&self, user: &User) -> Result<()>;

    /// Retrieve a user by ID
    async fn get_user(&self, user_id: &str) -> Result<Option<User>>;

    /// Retrieve a user by username, including the password hash
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Record a "log out everywhere" moment for a user
    async fn set_global_logout(&self, user_id: &str, at: DateTime<Utc>) -> Result<()>;
}

/// Trait for storing and retrieving OAuth clients
#[async_trait]
pub trait ClientStore {
    /// Store or replace a client
    async fn store_client(&self, client: &Client) -> Result<()>;

    /// Retrieve a client by public client ID
    async fn get_client(&self, client_id: &str) -> Result<Option<Client>>;

    /// Delete a client
    async fn delete_client(&self, client_id: &str) -> Result<()>;

    /// List all clients (for admin purposes)
    async fn list_clients(&self, limit: Option<usize>) -> Result<Vec<Client>>;
}

/// Trait for storing and retrieving roles and their invalidation timestamps
#[async_trait]
pub trait RoleStore {
    /// Store or replace a role
    async fn store_role(&self, role: &Role) -> Result<()>;

    /// Retrieve a role by ID
    async fn get_role(&self, role_id: &str) -> Result<Option<Role>>;

    /// List all roles ordered by ranking
    async fn list_roles(&self) -> Result<Vec<Role>>;

    /// Delete a role
    async fn delete_role(&self, role_id: &str) -> Result<()>;

    /// Record the moment a role's scope changed
    async fn set_role_invalidated_at(&self, role_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Retrieve the last moment a role's scope changed
    async fn get_role_invalidated_at(&self, role_id: &str) -> Result<Option<DateTime<Utc>>>;
}

/// Trait for storing and retrieving issued tokens
#[async_trait]
pub trait TokenStore {
    /// Store a new token
    async fn store_token(&self, token: &Token) -> Result<()>;

    /// Retrieve a token by access token
    async fn find_by_access_token(&self, access_token: &str) -> Result<Option<Token>>;

    /// Retrieve a token by refresh token
    async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Token>>;

    /// Delete the token holding this access token, returning the number removed
    async fn delete_by_access_token(&self, access_token: &str) -> Result<u64>;

    /// Delete the token holding this refresh token, returning the number removed
    async fn delete_by_refresh_token(&self, refresh_token: &str) -> Result<u64>;

    /// Remove tokens whose access and refresh tokens are both expired
    async fn cleanup_expired_tokens(&self) -> Result<usize>;
}

/// Trait for storing and retrieving authorization codes
#[async_trait]
pub trait AuthorizationCodeStore {
    /// Store a new authorization code
    async fn store_code(&self, code: &AuthorizationCode) -> Result<()>;

    /// Retrieve an authorization code
    async fn find_code(&self, code: &str) -> Result<Option<AuthorizationCode>>;

    /// Delete an authorization code, returning the number removed
    async fn delete_code(&self, code: &str) -> Result<u64>;

    /// Clean up expired codes
    async fn cleanup_expired_codes(&self) -> Result<usize>;
}

/// Combined credential store trait
pub trait CredentialStore:
    UserStore + ClientStore + RoleStore + TokenStore + AuthorizationCodeStore + Send + Sync
{
}

impl<T> CredentialStore for T where
    T: UserStore + ClientStore + RoleStore + TokenStore + AuthorizationCodeStore + Send + Sync
{
}
