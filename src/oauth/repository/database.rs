use super::{Result, TokenRepository, check_liveness, client_matches, stamp_code, stamp_token};
use crate::oauth::invalidation::SessionGuard;
use crate::oauth::types::*;
use crate::storage::CredentialStore;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

/// Tokens and codes as rows of the credential store
pub struct DatabaseTokenRepository {
    store: Arc<dyn CredentialStore>,
    guard: Arc<SessionGuard>,
}

impl DatabaseTokenRepository {
    pub fn new(store: Arc<dyn CredentialStore>, guard: Arc<SessionGuard>) -> Self {
        Self { store, guard }
    }
}

#[async_trait]
impl TokenRepository for DatabaseTokenRepository {
    async fn save_token(&self, token: NewToken, client: &Client, user: &Principal) -> Result<Token> {
        let token = stamp_token(token, client, user);
        self.store.store_token(&token).await.inspect_err(|err| {
            tracing::error!(client_id = %client.client_id, error = ?err, "Failed to save token");
        })?;
        Ok(token)
    }

    async fn check_token(&self, token: Option<Token>) -> Result<Option<Token>> {
        check_liveness(&self.guard, token).await
    }

    async fn get_access_token(&self, access_token: &str) -> Result<Option<Token>> {
        let token = self
            .store
            .find_by_access_token(access_token)
            .await
            .inspect_err(|err| tracing::error!(error = ?err, "Failed to load access token"))?
            .filter(|token| !token.is_access_token_expired(Utc::now()));

        self.check_token(token).await
    }

    async fn get_refresh_token(&self, refresh_token: &str) -> Result<Option<Token>> {
        let token = self
            .store
            .find_by_refresh_token(refresh_token)
            .await
            .inspect_err(|err| tracing::error!(error = ?err, "Failed to load refresh token"))?
            .filter(|token| !token.is_refresh_token_expired(Utc::now()));

        self.check_token(token).await
    }

    async fn revoke_token(&self, token: Option<&Token>) -> Result<bool> {
        let Some(token) = token else {
            return Ok(false);
        };

        let removed = match &token.refresh_token {
            Some(refresh_token) => self.store.delete_by_refresh_token(refresh_token).await,
            None => self.store.delete_by_access_token(&token.access_token).await,
        }
        .inspect_err(|err| tracing::error!(error = ?err, "Failed to revoke token"))?;

        tracing::debug!(removed, "Token revoked");
        Ok(true)
    }

    async fn save_authorization_code(
        &self,
        code: NewAuthorizationCode,
        client: &Client,
        user: &Principal,
    ) -> Result<AuthorizationCode> {
        let code = stamp_code(code, client, user);
        self.store.store_code(&code).await.inspect_err(|err| {
            tracing::error!(client_id = %client.client_id, error = ?err, "Failed to save authorization code");
        })?;
        Ok(code)
    }

    async fn get_authorization_code(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        Ok(self
            .store
            .find_code(code)
            .await
            .inspect_err(|err| tracing::error!(error = ?err, "Failed to load authorization code"))?
            .filter(|code| code.expires_at > Utc::now()))
    }

    async fn revoke_authorization_code(&self, code: Option<&AuthorizationCode>) -> Result<bool> {
        let Some(code) = code else {
            return Ok(false);
        };

        self.store
            .delete_code(&code.authorization_code)
            .await
            .inspect_err(|err| tracing::error!(error = ?err, "Failed to revoke authorization code"))?;
        Ok(true)
    }

    async fn consume_authorization_code(&self, code: &AuthorizationCode) -> Result<bool> {
        let removed = self
            .store
            .delete_code(&code.authorization_code)
            .await
            .inspect_err(|err| tracing::error!(error = ?err, "Failed to consume authorization code"))?;
        Ok(removed == 1)
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
