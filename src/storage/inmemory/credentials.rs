//! In-memory credential storage implementation
//!
//! Rows are returned regardless of expiry; expired rows only go away
//! through `cleanup_expired_*`.

use crate::errors::StorageError;
use crate::oauth::types::*;
use crate::storage::traits::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Tokens and their refresh index, locked together
#[derive(Default)]
struct TokenTables {
    by_access: HashMap<String, Token>,
    refresh_index: HashMap<String, String>, // refresh_token -> access_token
}

/// In-memory implementation of the credential store
#[derive(Default)]
pub struct MemoryCredentialStore {
    users: RwLock<HashMap<String, User>>,
    clients: RwLock<HashMap<String, Client>>, // client_id -> Client
    roles: RwLock<HashMap<String, Role>>,
    role_invalidations: RwLock<HashMap<String, DateTime<Utc>>>,
    tokens: RwLock<TokenTables>,
    auth_codes: RwLock<HashMap<String, AuthorizationCode>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryCredentialStore {
    async fn store_user(&self, user: &User) -> Result<()> {
        self.users
            .write()
            .await
            .insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn set_global_logout(&self, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut users = self.users.write().await;
        match users.get_mut(user_id) {
            Some(user) => {
                user.global_logout_at = Some(at);
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("User not found: {}", user_id))),
        }
    }
}

#[async_trait]
impl ClientStore for MemoryCredentialStore {
    async fn store_client(&self, client: &Client) -> Result<()> {
        self.clients
            .write()
            .await
            .insert(client.client_id.clone(), client.clone());
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<Client>> {
        Ok(self.clients.read().await.get(client_id).cloned())
    }

    async fn delete_client(&self, client_id: &str) -> Result<()> {
        self.clients.write().await.remove(client_id);
        Ok(())
    }

    async fn list_clients(&self, limit: Option<usize>) -> Result<Vec<Client>> {
        let clients = self.clients.read().await;
        let mut result: Vec<_> = clients.values().cloned().collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        if let Some(limit) = limit {
            result.truncate(limit);
        }
        Ok(result)
    }
}

#[async_trait]
impl RoleStore for MemoryCredentialStore {
    async fn store_role(&self, role: &Role) -> Result<()> {
        self.roles
            .write()
            .await
            .insert(role.id.clone(), role.clone());
        Ok(())
    }

    async fn get_role(&self, role_id: &str) -> Result<Option<Role>> {
        Ok(self.roles.read().await.get(role_id).cloned())
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let mut roles: Vec<_> = self.roles.read().await.values().cloned().collect();
        roles.sort_by_key(|role| role.ranking);
        Ok(roles)
    }

    async fn delete_role(&self, role_id: &str) -> Result<()> {
        self.roles.write().await.remove(role_id);
        Ok(())
    }

    async fn set_role_invalidated_at(&self, role_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.role_invalidations
            .write()
            .await
            .insert(role_id.to_string(), at);
        Ok(())
    }

    async fn get_role_invalidated_at(&self, role_id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.role_invalidations.read().await.get(role_id).copied())
    }
}

#[async_trait]
impl TokenStore for MemoryCredentialStore {
    async fn store_token(&self, token: &Token) -> Result<()> {
        let mut tables = self.tokens.write().await;

        if let Some(refresh_token) = &token.refresh_token {
            tables
                .refresh_index
                .insert(refresh_token.clone(), token.access_token.clone());
        }
        tables
            .by_access
            .insert(token.access_token.clone(), token.clone());
        Ok(())
    }

    async fn find_by_access_token(&self, access_token: &str) -> Result<Option<Token>> {
        Ok(self.tokens.read().await.by_access.get(access_token).cloned())
    }

    async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Token>> {
        let tables = self.tokens.read().await;
        Ok(tables
            .refresh_index
            .get(refresh_token)
            .and_then(|access_token| tables.by_access.get(access_token))
            .cloned())
    }

    async fn delete_by_access_token(&self, access_token: &str) -> Result<u64> {
        let mut tables = self.tokens.write().await;

        match tables.by_access.remove(access_token) {
            Some(token) => {
                if let Some(refresh_token) = &token.refresh_token {
                    tables.refresh_index.remove(refresh_token);
                }
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_by_refresh_token(&self, refresh_token: &str) -> Result<u64> {
        let mut tables = self.tokens.write().await;

        match tables.refresh_index.remove(refresh_token) {
            Some(access_token) => Ok(tables.by_access.remove(&access_token).map_or(0, |_| 1)),
            None => Ok(0),
        }
    }

    async fn cleanup_expired_tokens(&self) -> Result<usize> {
        let mut tables = self.tokens.write().await;
        let TokenTables {
            by_access,
            refresh_index,
        } = &mut *tables;

        let now = Utc::now();
        let initial_count = by_access.len();
        by_access.retain(|_, token| {
            !(token.is_access_token_expired(now) && token.is_refresh_token_expired(now))
        });
        refresh_index.retain(|_, access_token| by_access.contains_key(access_token));

        Ok(initial_count - by_access.len())
    }
}

#[async_trait]
impl AuthorizationCodeStore for MemoryCredentialStore {
    async fn store_code(&self, code: &AuthorizationCode) -> Result<()> {
        self.auth_codes
            .write()
            .await
            .insert(code.authorization_code.clone(), code.clone());
        Ok(())
    }

    async fn find_code(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        Ok(self.auth_codes.read().await.get(code).cloned())
    }

    async fn delete_code(&self, code: &str) -> Result<u64> {
        Ok(self
            .auth_codes
            .write()
            .await
            .remove(code)
            .map_or(0, |_| 1))
    }

    async fn cleanup_expired_codes(&self) -> Result<usize> {
        let mut codes = self.auth_codes.write().await;

        let now = Utc::now();
        let initial_count = codes.len();
        codes.retain(|_, code| code.expires_at > now);

        Ok(initial_count - codes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(access: &str, refresh: Option<&str>, access_ttl: Duration) -> Token {
        let now = Utc::now();
        Token {
            access_token: access.to_string(),
            access_token_expires_at: now + access_ttl,
            refresh_token: refresh.map(|r| r.to_string()),
            refresh_token_expires_at: refresh.map(|_| now + Duration::days(1)),
            scope: vec!["delegated:profile:read".to_string()],
            client: ClientSnapshot {
                id: "client-record".to_string(),
                client_id: "web".to_string(),
                grants: vec![GrantType::Password],
                role: EXTERNAL_CLIENT_ROLE.to_string(),
            },
            user: TokenUser::Reference {
                id: "user-1".to_string(),
            },
            registered_at: now,
        }
    }

    #[tokio::test]
    async fn test_refresh_index_follows_deletes() {
        let store = MemoryCredentialStore::new();
        store
            .store_token(&token("access-1", Some("refresh-1"), Duration::hours(1)))
            .await
            .unwrap();

        let found = store.find_by_refresh_token("refresh-1").await.unwrap();
        assert_eq!(found.unwrap().access_token, "access-1");

        assert_eq!(store.delete_by_access_token("access-1").await.unwrap(), 1);
        assert!(store.find_by_refresh_token("refresh-1").await.unwrap().is_none());
        assert_eq!(store.delete_by_refresh_token("refresh-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_tokens_with_live_refresh() {
        let store = MemoryCredentialStore::new();
        store
            .store_token(&token("expired", None, Duration::seconds(-1)))
            .await
            .unwrap();
        store
            .store_token(&token("refreshable", Some("r"), Duration::seconds(-1)))
            .await
            .unwrap();

        assert_eq!(store.cleanup_expired_tokens().await.unwrap(), 1);
        assert!(store.find_by_access_token("expired").await.unwrap().is_none());
        assert!(store.find_by_refresh_token("r").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_saves_and_refresh_lookups() {
        let store = std::sync::Arc::new(MemoryCredentialStore::new());
        store
            .store_token(&token("a0", Some("r0"), Duration::hours(1)))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for worker in 0..8 {
            let writer = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..200 {
                    let access = format!("a-{}-{}", worker, i);
                    let refresh = format!("r-{}-{}", worker, i);
                    writer
                        .store_token(&token(&access, Some(&refresh), Duration::hours(1)))
                        .await
                        .unwrap();
                }
            }));

            let reader = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..200 {
                    assert!(reader.find_by_refresh_token("r0").await.unwrap().is_some());
                }
            }));
        }

        let all = join_tasks(handles);
        tokio::time::timeout(std::time::Duration::from_secs(10), all)
            .await
            .expect("token table locks should not deadlock");
        assert!(store.find_by_refresh_token("r-7-199").await.unwrap().is_some());
    }

    async fn join_tasks(handles: Vec<tokio::task::JoinHandle<()>>) {
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_global_logout_requires_user() {
        let store = MemoryCredentialStore::new();
        let result = store.set_global_logout("missing", Utc::now()).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }
}
