//! Grant orchestration: authorization codes and the token endpoint's four grants.

use crate::config::TokenLifetimes;
use crate::errors::OAuthError;
use crate::oauth::repository::TokenRepository;
use crate::oauth::scope::ScopeAuthority;
use crate::oauth::types::*;
use crate::storage::CredentialStore;
use base64::{Engine, prelude::*};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use url::Url;

/// OAuth2 Authorization Server
pub struct AuthorizationServer {
    repository: Arc<dyn TokenRepository>,
    scopes: Arc<ScopeAuthority>,
    store: Arc<dyn CredentialStore>,
    lifetimes: TokenLifetimes,
}

/// Client credentials taken from the Authorization header
#[derive(Clone, Debug)]
pub struct ClientAuthentication {
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl AuthorizationServer {
    pub fn new(
        repository: Arc<dyn TokenRepository>,
        scopes: Arc<ScopeAuthority>,
        store: Arc<dyn CredentialStore>,
        lifetimes: TokenLifetimes,
    ) -> Self {
        Self {
            repository,
            scopes,
            store,
            lifetimes,
        }
    }

    /// Issue an authorization code for an already authenticated user.
    ///
    /// Returns the redirect URL carrying the code and the caller's state.
    pub async fn authorize(
        &self,
        request: AuthorizationRequest,
        user: &Principal,
    ) -> Result<String, OAuthError> {
        let client = self
            .repository
            .get_client(&request.client_id, None)
            .await?
            .ok_or_else(|| OAuthError::InvalidClient("Client not found".to_string()))?;

        if !client.allows_grant(GrantType::AuthorizationCode) {
            return Err(OAuthError::UnauthorizedClient(
                "Client may not use the authorization_code grant".to_string(),
            ));
        }

        if !client.redirect_uris.contains(&request.redirect_uri) {
            return Err(OAuthError::InvalidRequest(
                "Invalid redirect URI".to_string(),
            ));
        }

        let code_challenge_method = match (&request.code_challenge, request.code_challenge_method) {
            (None, _) => None,
            (Some(_), None) => Some("plain".to_string()),
            (Some(_), Some(method)) if method == "plain" || method == "S256" => Some(method),
            (Some(_), Some(method)) => {
                return Err(OAuthError::InvalidRequest(format!(
                    "Unsupported PKCE method: {}",
                    method
                )));
            }
        };

        let requested = self.requested_scope(request.scope.as_deref(), &client);
        let scope = self
            .scopes
            .validate_scope(user, &client, &requested)
            .await
            .ok_or_else(|| OAuthError::InvalidScope("Requested scope is not allowed".to_string()))?;

        let mut redirect_url = Url::parse(&request.redirect_uri)
            .map_err(|e| OAuthError::InvalidRequest(format!("Invalid redirect URI: {}", e)))?;

        let code = self
            .repository
            .save_authorization_code(
                NewAuthorizationCode {
                    authorization_code: generate_token(),
                    expires_at: Utc::now() + self.lifetimes.authorization_code,
                    redirect_uri: request.redirect_uri,
                    code_challenge: request.code_challenge,
                    code_challenge_method,
                    scope,
                },
                &client,
                user,
            )
            .await?;

        redirect_url
            .query_pairs_mut()
            .append_pair("code", &code.authorization_code);
        if let Some(state) = request.state {
            redirect_url.query_pairs_mut().append_pair("state", &state);
        }

        tracing::debug!(client_id = %client.client_id, user_id = %user.id, "Authorization code issued");
        Ok(redirect_url.to_string())
    }

    /// Handle token requests, dispatching on `grant_type`
    pub async fn token(
        &self,
        request: TokenRequest,
        client_auth: Option<ClientAuthentication>,
    ) -> Result<TokenResponse, OAuthError> {
        let grant: GrantType = request.grant_type.parse()?;
        let client = self.authenticate_client(grant, &request, client_auth).await?;

        let token = match grant {
            GrantType::AuthorizationCode => {
                self.handle_authorization_code_grant(&request, &client)
                    .await?
            }
            GrantType::RefreshToken => self.handle_refresh_token_grant(&request, &client).await?,
            GrantType::ClientCredentials => {
                self.handle_client_credentials_grant(&request, &client)
                    .await?
            }
            GrantType::Password => self.handle_password_grant(&request, &client).await?,
        };

        tracing::info!(
            grant = grant.as_str(),
            client_id = %client.client_id,
            user_id = %token.user.id(),
            "Token issued"
        );
        Ok(TokenResponse::from_token(&token, Utc::now()))
    }

    /// Revoke whichever token `token` names; unknown tokens are ignored
    pub async fn revoke(&self, token: &str) -> Result<bool, OAuthError> {
        let found = match self.repository.get_access_token(token).await? {
            Some(found) => Some(found),
            None => self.repository.get_refresh_token(token).await?,
        };
        Ok(self.repository.revoke_token(found.as_ref()).await?)
    }

    async fn handle_authorization_code_grant(
        &self,
        request: &TokenRequest,
        client: &Client,
    ) -> Result<Token, OAuthError> {
        let code = request
            .code
            .as_deref()
            .ok_or_else(|| OAuthError::InvalidRequest("Missing authorization code".to_string()))?;

        let redirect_uri = request
            .redirect_uri
            .as_deref()
            .ok_or_else(|| OAuthError::InvalidRequest("Missing redirect URI".to_string()))?;

        let auth_code = self
            .repository
            .get_authorization_code(code)
            .await?
            .ok_or_else(|| OAuthError::InvalidGrant("Invalid authorization code".to_string()))?;

        if auth_code.client.client_id != client.client_id {
            return Err(OAuthError::InvalidGrant(
                "Authorization code was issued to another client".to_string(),
            ));
        }

        if auth_code.redirect_uri != redirect_uri {
            return Err(OAuthError::InvalidGrant(
                "Redirect URI mismatch".to_string(),
            ));
        }

        if let Some(code_challenge) = &auth_code.code_challenge {
            let code_verifier = request
                .code_verifier
                .as_deref()
                .ok_or_else(|| OAuthError::InvalidRequest("Missing code verifier".to_string()))?;

            let method = auth_code
                .code_challenge_method
                .as_deref()
                .unwrap_or("plain");

            if !verify_pkce(code_verifier, code_challenge, method)? {
                return Err(OAuthError::InvalidGrant(
                    "PKCE verification failed".to_string(),
                ));
            }
        }

        // Single use: only the caller that removed the code may mint tokens
        if !self
            .repository
            .consume_authorization_code(&auth_code)
            .await?
        {
            return Err(OAuthError::InvalidGrant(
                "Authorization code was already redeemed".to_string(),
            ));
        }

        let principal = self.resolve_principal(&auth_code.user).await?;
        self.issue(
            GrantType::AuthorizationCode,
            auth_code.scope,
            client,
            &principal,
        )
        .await
    }

    async fn handle_refresh_token_grant(
        &self,
        request: &TokenRequest,
        client: &Client,
    ) -> Result<Token, OAuthError> {
        let refresh_token = request
            .refresh_token
            .as_deref()
            .ok_or_else(|| OAuthError::InvalidRequest("Missing refresh token".to_string()))?;

        let old_token = self
            .repository
            .get_refresh_token(refresh_token)
            .await?
            .ok_or_else(|| OAuthError::InvalidGrant("Invalid refresh token".to_string()))?;

        if old_token.client.client_id != client.client_id {
            return Err(OAuthError::InvalidGrant(
                "Refresh token was issued to another client".to_string(),
            ));
        }

        let scope = match request.scope.as_deref() {
            Some(requested) => {
                let requested = parse_scope(requested);
                if !requested.iter().all(|entry| old_token.scope.contains(entry)) {
                    return Err(OAuthError::InvalidScope(
                        "Requested scope exceeds the original grant".to_string(),
                    ));
                }
                requested
            }
            None => old_token.scope.clone(),
        };

        if let TokenUser::Loaded { user } = &old_token.user {
            if user.is_banned {
                return Err(OAuthError::InvalidGrant("Account is banned".to_string()));
            }
        }

        let principal = old_token
            .user
            .principal()
            .ok_or_else(|| OAuthError::InvalidGrant("Invalid refresh token".to_string()))?;

        self.repository.revoke_token(Some(&old_token)).await?;
        self.issue(GrantType::RefreshToken, scope, client, &principal)
            .await
    }

    async fn handle_client_credentials_grant(
        &self,
        request: &TokenRequest,
        client: &Client,
    ) -> Result<Token, OAuthError> {
        let principal = client.principal();
        let requested = self.requested_scope(request.scope.as_deref(), client);

        let scope = self
            .scopes
            .validate_scope(&principal, client, &requested)
            .await
            .ok_or_else(|| OAuthError::InvalidScope("Requested scope is not allowed".to_string()))?;

        self.issue(GrantType::ClientCredentials, scope, client, &principal)
            .await
    }

    async fn handle_password_grant(
        &self,
        request: &TokenRequest,
        client: &Client,
    ) -> Result<Token, OAuthError> {
        let (username, password) = match (&request.username, &request.password) {
            (Some(username), Some(password)) => (username, password),
            _ => {
                return Err(OAuthError::InvalidRequest(
                    "Missing username or password".to_string(),
                ));
            }
        };

        let invalid_credentials = || OAuthError::InvalidGrant("Invalid username or password".to_string());

        let user = self
            .store
            .get_user_by_username(username)
            .await?
            .ok_or_else(invalid_credentials)?;

        let password_hash = user.password_hash.as_deref().ok_or_else(invalid_credentials)?;
        let verified = bcrypt::verify(password, password_hash).map_err(|e| {
            OAuthError::ServerError(format!("Failed to verify password: {}", e))
        })?;
        if !verified {
            return Err(invalid_credentials());
        }

        if user.is_banned {
            return Err(OAuthError::InvalidGrant("Account is banned".to_string()));
        }

        let principal = user.principal();
        let requested = self.requested_scope(request.scope.as_deref(), client);
        let scope = self
            .scopes
            .validate_scope(&principal, client, &requested)
            .await
            .ok_or_else(|| OAuthError::InvalidScope("Requested scope is not allowed".to_string()))?;

        self.issue(GrantType::Password, scope, client, &principal)
            .await
    }

    /// Identify the client and check it may use `grant`.
    ///
    /// A secret is required when the client has one, and always for
    /// `client_credentials`.
    async fn authenticate_client(
        &self,
        grant: GrantType,
        request: &TokenRequest,
        client_auth: Option<ClientAuthentication>,
    ) -> Result<Client, OAuthError> {
        let (client_id, client_secret) = match client_auth {
            Some(auth) => (Some(auth.client_id), auth.client_secret),
            None => (request.client_id.clone(), request.client_secret.clone()),
        };

        let client_id =
            client_id.ok_or_else(|| OAuthError::InvalidClient("Missing client_id".to_string()))?;

        let client = self
            .repository
            .get_client(&client_id, client_secret.as_deref())
            .await?
            .ok_or_else(|| OAuthError::InvalidClient("Invalid client credentials".to_string()))?;

        let secret_required =
            grant == GrantType::ClientCredentials || client.client_secret.is_some();
        if secret_required && client_secret.is_none() {
            return Err(OAuthError::InvalidClient(
                "Missing client secret".to_string(),
            ));
        }

        if !client.allows_grant(grant) {
            return Err(OAuthError::UnauthorizedClient(format!(
                "Client may not use the {} grant",
                grant.as_str()
            )));
        }

        Ok(client)
    }

    /// Principal a code was issued to, failing when the account is gone or banned
    async fn resolve_principal(&self, owner: &TokenUser) -> Result<Principal, OAuthError> {
        match owner {
            TokenUser::Embedded { principal } => Ok(principal.clone()),
            TokenUser::Reference { id } | TokenUser::Loaded { user: User { id, .. } } => {
                let user = self
                    .store
                    .get_user(id)
                    .await?
                    .ok_or_else(|| OAuthError::InvalidGrant("User no longer exists".to_string()))?;
                if user.is_banned {
                    return Err(OAuthError::InvalidGrant("Account is banned".to_string()));
                }
                Ok(user.principal())
            }
        }
    }

    fn requested_scope(&self, scope: Option<&str>, client: &Client) -> Vec<String> {
        match scope {
            Some(scope) => parse_scope(scope),
            None => client.scope.clone(),
        }
    }

    async fn issue(
        &self,
        grant: GrantType,
        scope: Vec<String>,
        client: &Client,
        principal: &Principal,
    ) -> Result<Token, OAuthError> {
        let now = Utc::now();
        let (refresh_token, refresh_token_expires_at) = if grant.issues_refresh_token() {
            (Some(generate_token()), Some(now + self.lifetimes.refresh_token))
        } else {
            (None, None)
        };

        let token = NewToken {
            access_token: generate_token(),
            access_token_expires_at: now + self.lifetimes.access_token,
            refresh_token,
            refresh_token_expires_at,
            scope,
        };

        Ok(self.repository.save_token(token, client, principal).await?)
    }
}

/// Verify a PKCE code verifier against the stored challenge
pub fn verify_pkce(code_verifier: &str, code_challenge: &str, method: &str) -> Result<bool, OAuthError> {
    let computed_challenge = match method {
        "plain" => code_verifier.to_string(),
        "S256" => {
            let mut hasher = Sha256::new();
            hasher.update(code_verifier.as_bytes());
            BASE64_URL_SAFE_NO_PAD.encode(hasher.finalize())
        }
        _ => {
            return Err(OAuthError::InvalidRequest(format!(
                "Unsupported PKCE method: {}",
                method
            )));
        }
    };

    Ok(computed_challenge == code_challenge)
}

/// Read client credentials from an HTTP Basic Authorization header value
pub fn parse_basic_auth(header: &str) -> Option<ClientAuthentication> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = BASE64_STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (client_id, client_secret) = credentials.split_once(':')?;

    Some(ClientAuthentication {
        client_id: client_id.to_string(),
        client_secret: Some(client_secret.to_string()).filter(|s| !s.is_empty()),
    })
}
