use super::{Result, TokenRepository, check_liveness, client_matches, stamp_code, stamp_token};
use crate::cache::{Cache, CacheBackend};
use crate::config::TokenLifetimes;
use crate::oauth::invalidation::SessionGuard;
use crate::oauth::types::*;
use crate::storage::CredentialStore;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

fn access_token_key(token: &str) -> String {
    format!("access-token:{}", token)
}

fn refresh_token_key(token: &str) -> String {
    format!("refresh-token:{}", token)
}

fn authorization_code_key(code: &str) -> String {
    format!("authorization-code:{}", code)
}

fn ttl(lifetime: chrono::Duration) -> Duration {
    lifetime.to_std().unwrap_or_default()
}

/// Tokens and codes as cache entries expiring with their configured lifetime.
///
/// Clients are still read from the credential store.
pub struct CacheTokenRepository {
    store: Arc<dyn CredentialStore>,
    cache: Cache,
    guard: Arc<SessionGuard>,
    lifetimes: TokenLifetimes,
}

impl CacheTokenRepository {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cache: Cache,
        guard: Arc<SessionGuard>,
        lifetimes: TokenLifetimes,
    ) -> Self {
        Self {
            store,
            cache,
            guard,
            lifetimes,
        }
    }

    async fn load_token(&self, key: &str) -> Result<Option<Token>> {
        Ok(self
            .cache
            .get::<Token>(key)
            .await
            .inspect_err(|err| tracing::error!(error = ?err, "Failed to read token from cache"))?)
    }
}

#[async_trait]
impl TokenRepository for CacheTokenRepository {
    async fn save_token(&self, token: NewToken, client: &Client, user: &Principal) -> Result<Token> {
        let token = stamp_token(token, client, user);

        // The two writes are independent; a failure between them leaves an
        // access token without its refresh token.
        self.cache
            .set(
                &access_token_key(&token.access_token),
                &token,
                ttl(self.lifetimes.access_token),
            )
            .await
            .inspect_err(|err| tracing::error!(error = ?err, "Failed to cache access token"))?;

        if let Some(refresh_token) = &token.refresh_token {
            self.cache
                .set(
                    &refresh_token_key(refresh_token),
                    &token,
                    ttl(self.lifetimes.refresh_token),
                )
                .await
                .inspect_err(|err| tracing::error!(error = ?err, "Failed to cache refresh token"))?;
        }

        Ok(token)
    }

    async fn check_token(&self, token: Option<Token>) -> Result<Option<Token>> {
        check_liveness(&self.guard, token).await
    }

    async fn get_access_token(&self, access_token: &str) -> Result<Option<Token>> {
        let token = self
            .load_token(&access_token_key(access_token))
            .await?
            .filter(|token| !token.is_access_token_expired(Utc::now()));

        self.check_token(token).await
    }

    async fn get_refresh_token(&self, refresh_token: &str) -> Result<Option<Token>> {
        let token = self
            .load_token(&refresh_token_key(refresh_token))
            .await?
            .filter(|token| !token.is_refresh_token_expired(Utc::now()));

        self.check_token(token).await
    }

    async fn revoke_token(&self, token: Option<&Token>) -> Result<bool> {
        let Some(token) = token else {
            return Ok(false);
        };

        self.cache
            .delete(&access_token_key(&token.access_token))
            .await
            .inspect_err(|err| tracing::error!(error = ?err, "Failed to revoke access token"))?;

        if let Some(refresh_token) = &token.refresh_token {
            self.cache
                .delete(&refresh_token_key(refresh_token))
                .await
                .inspect_err(|err| tracing::error!(error = ?err, "Failed to revoke refresh token"))?;
        }

        Ok(true)
    }

    async fn save_authorization_code(
        &self,
        code: NewAuthorizationCode,
        client: &Client,
        user: &Principal,
    ) -> Result<AuthorizationCode> {
        let code = stamp_code(code, client, user);
        self.cache
            .set(
                &authorization_code_key(&code.authorization_code),
                &code,
                ttl(self.lifetimes.authorization_code),
            )
            .await
            .inspect_err(|err| tracing::error!(error = ?err, "Failed to cache authorization code"))?;
        Ok(code)
    }

    async fn get_authorization_code(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        Ok(self
            .cache
            .get::<AuthorizationCode>(&authorization_code_key(code))
            .await
            .inspect_err(|err| tracing::error!(error = ?err, "Failed to read authorization code"))?
            .filter(|code| code.expires_at > Utc::now()))
    }

    async fn revoke_authorization_code(&self, code: Option<&AuthorizationCode>) -> Result<bool> {
        let Some(code) = code else {
            return Ok(false);
        };

        self.cache
            .delete(&authorization_code_key(&code.authorization_code))
            .await
            .inspect_err(|err| tracing::error!(error = ?err, "Failed to revoke authorization code"))?;
        Ok(true)
    }

    async fn consume_authorization_code(&self, code: &AuthorizationCode) -> Result<bool> {
        Ok(self
            .cache
            .delete(&authorization_code_key(&code.authorization_code))
            .await
            .inspect_err(|err| tracing::error!(error = ?err, "Failed to consume authorization code"))?)
    }

    async fn get_client(&self, client_id: &str, client_secret: Option<&str>) -> Result<Option<Client>> {
        Ok(self
            .store
            .get_client(client_id)
            .await
            .inspect_err(|err| tracing::error!(client_id, error = ?err, "Failed to load client"))?
            .filter(|client| client_matches(client, client_secret)))
    }
}
