//! Token and authorization code repository.
//!
//! One [`TokenRepository`] trait with two adapters: [`DatabaseTokenRepository`]
//! keeps tokens in the credential store, [`CacheTokenRepository`] keeps them in
//! the key/value cache with TTL expiry. The adapter is chosen once at startup.
//!
//! Both adapters apply the same liveness rules on read: expiry, role
//! invalidation, and global logout.

mod cache;
mod database;

pub use cache::CacheTokenRepository;
pub use database::DatabaseTokenRepository;

use crate::cache::Cache;
use crate::config::TokenLifetimes;
use crate::errors::StorageError;
use crate::oauth::invalidation::{SessionGuard, is_token_invalidated};
use crate::oauth::types::*;
use crate::storage::CredentialStore;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, StorageError>;

#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Persist a freshly minted token on behalf of `user` acting through `client`
    async fn save_token(&self, token: NewToken, client: &Client, user: &Principal) -> Result<Token>;

    /// Re-check liveness of a token read from storage
    async fn check_token(&self, token: Option<Token>) -> Result<Option<Token>>;

    /// Find a live token by its access token
    async fn get_access_token(&self, access_token: &str) -> Result<Option<Token>>;

    /// Find a live token by its refresh token
    async fn get_refresh_token(&self, refresh_token: &str) -> Result<Option<Token>>;

    /// Remove a token; `false` only when there was nothing to revoke
    async fn revoke_token(&self, token: Option<&Token>) -> Result<bool>;

    async fn save_authorization_code(
        &self,
        code: NewAuthorizationCode,
        client: &Client,
        user: &Principal,
    ) -> Result<AuthorizationCode>;

    /// Find an unexpired authorization code
    async fn get_authorization_code(&self, code: &str) -> Result<Option<AuthorizationCode>>;

    /// Remove a code; `false` only when there was nothing to revoke
    async fn revoke_authorization_code(&self, code: Option<&AuthorizationCode>) -> Result<bool>;

    /// Remove a code for redemption; `true` only for the call that actually removed it
    async fn consume_authorization_code(&self, code: &AuthorizationCode) -> Result<bool>;

    /// Find a client by public id, and by secret when one is supplied
    async fn get_client(&self, client_id: &str, client_secret: Option<&str>) -> Result<Option<Client>>;
}

/// Select the repository adapter
pub fn create_token_repository(
    use_cache: bool,
    store: Arc<dyn CredentialStore>,
    cache: Cache,
    guard: Arc<SessionGuard>,
    lifetimes: TokenLifetimes,
) -> Arc<dyn TokenRepository> {
    if use_cache {
        tracing::info!("Tokens are kept in the cache");
        Arc::new(CacheTokenRepository::new(store, cache, guard, lifetimes))
    } else {
        tracing::info!("Tokens are kept in the credential store");
        Arc::new(DatabaseTokenRepository::new(store, guard))
    }
}

fn stamp_token(token: NewToken, client: &Client, user: &Principal) -> Token {
    Token {
        access_token: token.access_token,
        access_token_expires_at: token.access_token_expires_at,
        refresh_token: token.refresh_token,
        refresh_token_expires_at: token.refresh_token_expires_at,
        scope: token.scope,
        client: client.snapshot(),
        user: TokenUser::for_principal(user, client),
        registered_at: Utc::now(),
    }
}

fn stamp_code(code: NewAuthorizationCode, client: &Client, user: &Principal) -> AuthorizationCode {
    AuthorizationCode {
        authorization_code: code.authorization_code,
        expires_at: code.expires_at,
        redirect_uri: code.redirect_uri,
        code_challenge: code.code_challenge,
        code_challenge_method: code.code_challenge_method,
        scope: code.scope,
        client: client.snapshot(),
        user: TokenUser::for_principal(user, client),
        created_at: Utc::now(),
    }
}

/// Liveness rules shared by both adapters.
///
/// Referenced users are re-fetched so the returned token carries the
/// current account; a user that no longer exists makes the token dead.
async fn check_liveness(guard: &SessionGuard, token: Option<Token>) -> Result<Option<Token>> {
    let Some(mut token) = token else {
        return Ok(None);
    };

    let (role, global_logout_at) = match &token.user {
        TokenUser::Embedded { principal } => (principal.role.clone(), None),
        TokenUser::Reference { .. } | TokenUser::Loaded { .. } => {
            let user_id = token.user.id().to_string();
            let Some(user) = guard.get_user_info(&user_id).await? else {
                tracing::debug!(%user_id, "Token owner no longer exists");
                return Ok(None);
            };
            let found = (user.role.clone(), user.global_logout_at);
            token.user = TokenUser::Loaded { user };
            found
        }
    };

    if guard.is_role_invalidated(&role, token.registered_at).await? {
        tracing::debug!(role_id = %role, "Token role was invalidated");
        return Ok(None);
    }

    if is_token_invalidated(global_logout_at, token.registered_at) {
        tracing::debug!(user_id = %token.user.id(), "Token predates global logout");
        return Ok(None);
    }

    Ok(Some(token))
}

fn client_matches(client: &Client, client_secret: Option<&str>) -> bool {
    match client_secret {
        None => true,
        Some(secret) => client.client_secret.as_deref() == Some(secret),
    }
}
