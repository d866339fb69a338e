//! End-to-end grant flows through the authorization server.

use async_trait::async_trait;
use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
use chrono::Utc;
use idp::cache::{Cache, MemoryCache};
use idp::config::TokenLifetimes;
use idp::errors::{OAuthError, StorageError};
use idp::oauth::types::*;
use idp::oauth::{
    AuthorizationServer, ClientAuthentication, RoleCache, RoleService, ScopeAuthority,
    SessionGuard, TokenRepository, create_token_repository,
};
use idp::storage::{ClientStore, CredentialStore, MemoryCredentialStore, RoleStore, UserStore};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const REDIRECT_URI: &str = "https://app.example.com/callback";
const PASSWORD: &str = "correct horse";

struct Harness {
    store: Arc<MemoryCredentialStore>,
    guard: Arc<SessionGuard>,
    roles: RoleService,
    repository: Arc<dyn TokenRepository>,
    server: AuthorizationServer,
}

async fn harness(use_cache: bool) -> Harness {
    let store = Arc::new(MemoryCredentialStore::new());
    let store_dyn: Arc<dyn CredentialStore> = store.clone();
    let cache = Cache::Memory(MemoryCache::new());
    let lifetimes = TokenLifetimes::default();

    let guard = Arc::new(SessionGuard::new(
        store_dyn.clone(),
        use_cache.then(|| cache.clone()),
        Duration::from_secs(3600),
    ));
    let role_cache = Arc::new(RoleCache::new(store_dyn.clone()));
    let roles = RoleService::new(store_dyn.clone(), role_cache.clone(), guard.clone());
    roles.seed_system_roles().await.unwrap();
    roles
        .save_role(Role {
            id: "regular".to_string(),
            name: "Regular".to_string(),
            ranking: 150,
            scope: vec!["c".to_string()],
            kind: RoleKind::User,
            description: None,
        })
        .await
        .unwrap();

    let scopes = Arc::new(ScopeAuthority::new(
        role_cache,
        vec!["delegated:profile:read".to_string()],
    ));
    let repository =
        create_token_repository(use_cache, store_dyn.clone(), cache, guard.clone(), lifetimes);
    let server = AuthorizationServer::new(repository.clone(), scopes, store_dyn, lifetimes);

    for client in clients() {
        store.store_client(&client).await.unwrap();
    }
    let hash = bcrypt::hash(PASSWORD, 4).unwrap();
    for (id, username, role, scope, banned) in [
        ("user-alice", "alice", USER_ROLE, Some(vec!["delegated:profile:read", "delegated:posts:read"]), false),
        ("user-bob", "bob", "regular", Some(vec!["a"]), false),
        ("user-mallory", "mallory", USER_ROLE, None, true),
    ] {
        store
            .store_user(&User {
                id: id.to_string(),
                username: username.to_string(),
                email: None,
                password_hash: Some(hash.clone()),
                role: role.to_string(),
                scope: scope.map(|s| s.into_iter().map(String::from).collect()),
                is_banned: banned,
                is_restricted: false,
                global_logout_at: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    Harness {
        store,
        guard,
        roles,
        repository,
        server,
    }
}

fn client(
    id: &str,
    secret: Option<&str>,
    role: &str,
    scope: &[&str],
    grants: Vec<GrantType>,
) -> Client {
    Client {
        id: format!("{}-record", id),
        client_id: id.to_string(),
        client_secret: secret.map(String::from),
        name: None,
        role: role.to_string(),
        scope: scope.iter().map(|s| s.to_string()).collect(),
        grants,
        redirect_uris: vec![REDIRECT_URI.to_string()],
        created_at: Utc::now(),
    }
}

fn clients() -> Vec<Client> {
    vec![
        client(
            "web",
            Some("web-secret"),
            EXTERNAL_CLIENT_ROLE,
            &["delegated:*", "a", "b"],
            vec![
                GrantType::AuthorizationCode,
                GrantType::RefreshToken,
                GrantType::Password,
            ],
        ),
        client(
            "spa",
            None,
            EXTERNAL_CLIENT_ROLE,
            &["delegated:*"],
            vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
        ),
        client(
            "service",
            Some("service-secret"),
            EXTERNAL_CLIENT_ROLE,
            &["api:*"],
            vec![GrantType::ClientCredentials],
        ),
        client(
            "internal",
            Some("internal-secret"),
            INTERNAL_CLIENT_ROLE,
            &["*"],
            vec![GrantType::Password, GrantType::RefreshToken],
        ),
    ]
}

fn request(grant_type: &str) -> TokenRequest {
    TokenRequest {
        grant_type: grant_type.to_string(),
        code: None,
        redirect_uri: None,
        code_verifier: None,
        refresh_token: None,
        client_id: None,
        client_secret: None,
        username: None,
        password: None,
        scope: None,
    }
}

fn basic(client_id: &str, secret: &str) -> Option<ClientAuthentication> {
    Some(ClientAuthentication {
        client_id: client_id.to_string(),
        client_secret: Some(secret.to_string()),
    })
}

fn password_request(username: &str, scope: Option<&str>) -> TokenRequest {
    TokenRequest {
        username: Some(username.to_string()),
        password: Some(PASSWORD.to_string()),
        scope: scope.map(String::from),
        ..request("password")
    }
}

async fn password_grant(h: &Harness, username: &str, scope: Option<&str>) -> TokenResponse {
    h.server
        .token(password_request(username, scope), basic("web", "web-secret"))
        .await
        .unwrap()
}

fn code_from(redirect: &str) -> String {
    url::Url::parse(redirect)
        .unwrap()
        .query_pairs()
        .find(|(key, _)| key == "code")
        .map(|(_, value)| value.into_owned())
        .expect("redirect should carry a code")
}

fn alice() -> Principal {
    Principal {
        id: "user-alice".to_string(),
        username: "alice".to_string(),
        role: USER_ROLE.to_string(),
        scope: Some(vec![
            "delegated:profile:read".to_string(),
            "delegated:posts:read".to_string(),
        ]),
    }
}

#[tokio::test]
async fn test_authorization_code_flow_with_pkce() {
    for use_cache in [false, true] {
        let h = harness(use_cache).await;
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));

        let redirect = h
            .server
            .authorize(
                AuthorizationRequest {
                    client_id: "spa".to_string(),
                    redirect_uri: REDIRECT_URI.to_string(),
                    scope: Some("delegated:profile:read".to_string()),
                    state: Some("xyz".to_string()),
                    code_challenge: Some(challenge),
                    code_challenge_method: Some("S256".to_string()),
                },
                &alice(),
            )
            .await
            .unwrap();
        assert!(redirect.starts_with(REDIRECT_URI));
        assert!(redirect.contains("state=xyz"));
        let code = code_from(&redirect);

        let exchange = |verifier: &str| TokenRequest {
            code: Some(code.clone()),
            redirect_uri: Some(REDIRECT_URI.to_string()),
            code_verifier: Some(verifier.to_string()),
            client_id: Some("spa".to_string()),
            ..request("authorization_code")
        };

        let wrong = h.server.token(exchange("not-the-verifier"), None).await;
        assert!(matches!(wrong, Err(OAuthError::InvalidGrant(_))));

        let response = h.server.token(exchange(verifier), None).await.unwrap();
        assert_eq!(response.scope, "delegated:profile:read");
        assert!(response.refresh_token.is_some());

        let token = h
            .repository
            .get_access_token(&response.access_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.user.id(), "user-alice");

        // Codes are single use
        let replay = h.server.token(exchange(verifier), None).await;
        assert!(matches!(replay, Err(OAuthError::InvalidGrant(_))));
    }
}

#[tokio::test]
async fn test_authorize_rejects_unknown_redirect() {
    let h = harness(false).await;
    let result = h
        .server
        .authorize(
            AuthorizationRequest {
                client_id: "spa".to_string(),
                redirect_uri: "https://evil.example.com/callback".to_string(),
                scope: None,
                state: None,
                code_challenge: None,
                code_challenge_method: None,
            },
            &alice(),
        )
        .await;
    assert!(matches!(result, Err(OAuthError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_refresh_rotates_token_pair() {
    for use_cache in [false, true] {
        let h = harness(use_cache).await;
        let first = password_grant(&h, "alice", Some("delegated:profile:read delegated:posts:read")).await;
        let refresh_token = first.refresh_token.clone().unwrap();

        let refresh = |scope: Option<&str>, token: &str| TokenRequest {
            refresh_token: Some(token.to_string()),
            scope: scope.map(String::from),
            ..request("refresh_token")
        };

        let widened = h
            .server
            .token(
                refresh(Some("delegated:profile:write"), &refresh_token),
                basic("web", "web-secret"),
            )
            .await;
        assert!(matches!(widened, Err(OAuthError::InvalidScope(_))));

        let second = h
            .server
            .token(
                refresh(Some("delegated:profile:read"), &refresh_token),
                basic("web", "web-secret"),
            )
            .await
            .unwrap();
        assert_eq!(second.scope, "delegated:profile:read");
        assert_ne!(second.access_token, first.access_token);

        // The old pair is gone
        assert!(
            h.repository
                .get_access_token(&first.access_token)
                .await
                .unwrap()
                .is_none()
        );
        let reused = h
            .server
            .token(refresh(None, &refresh_token), basic("web", "web-secret"))
            .await;
        assert!(matches!(reused, Err(OAuthError::InvalidGrant(_))));

        // Another client cannot use the refresh token
        let stolen = h
            .server
            .token(
                refresh(None, second.refresh_token.as_deref().unwrap()),
                basic("internal", "internal-secret"),
            )
            .await;
        assert!(matches!(stolen, Err(OAuthError::InvalidGrant(_))));
    }
}

#[tokio::test]
async fn test_client_credentials_grant() {
    for use_cache in [false, true] {
        let h = harness(use_cache).await;

        let response = h
            .server
            .token(
                TokenRequest {
                    scope: Some("api:read".to_string()),
                    ..request("client_credentials")
                },
                basic("service", "service-secret"),
            )
            .await
            .unwrap();
        assert_eq!(response.scope, "api:read");
        assert!(response.refresh_token.is_none());

        let token = h
            .repository
            .get_access_token(&response.access_token)
            .await
            .unwrap()
            .unwrap();
        assert!(token.user.is_application_client());

        let without_secret = h
            .server
            .token(
                TokenRequest {
                    client_id: Some("service".to_string()),
                    ..request("client_credentials")
                },
                None,
            )
            .await;
        assert!(matches!(without_secret, Err(OAuthError::InvalidClient(_))));

        let beyond_ceiling = h
            .server
            .token(
                TokenRequest {
                    scope: Some("admin:users".to_string()),
                    ..request("client_credentials")
                },
                basic("service", "service-secret"),
            )
            .await;
        assert!(matches!(beyond_ceiling, Err(OAuthError::InvalidScope(_))));
    }
}

#[tokio::test]
async fn test_password_grant_rejections() {
    let h = harness(false).await;

    let mut wrong_password = password_request("alice", None);
    wrong_password.password = Some("battery staple".to_string());
    let result = h.server.token(wrong_password, basic("web", "web-secret")).await;
    assert!(matches!(result, Err(OAuthError::InvalidGrant(_))));

    let result = h
        .server
        .token(password_request("mallory", None), basic("web", "web-secret"))
        .await;
    assert!(matches!(result, Err(OAuthError::InvalidGrant(_))));

    let result = h
        .server
        .token(password_request("alice", None), basic("web", "wrong-secret"))
        .await;
    assert!(matches!(result, Err(OAuthError::InvalidClient(_))));

    let result = h
        .server
        .token(password_request("alice", None), basic("service", "service-secret"))
        .await;
    assert!(matches!(result, Err(OAuthError::UnauthorizedClient(_))));

    let result = h
        .server
        .token(request("implicit"), basic("web", "web-secret"))
        .await;
    assert!(matches!(result, Err(OAuthError::UnsupportedGrantType(_))));
}

#[tokio::test]
async fn test_internal_client_grants_full_entitlement() {
    let h = harness(false).await;

    let response = h
        .server
        .token(
            password_request("bob", Some("b")),
            basic("internal", "internal-secret"),
        )
        .await
        .unwrap();
    assert_eq!(response.scope, "a c");
}

#[tokio::test]
async fn test_external_client_cannot_exceed_user_scope() {
    let h = harness(false).await;

    let result = h
        .server
        .token(password_request("bob", Some("b")), basic("web", "web-secret"))
        .await;
    assert!(matches!(result, Err(OAuthError::InvalidScope(_))));

    let response = password_grant(&h, "bob", Some("a")).await;
    assert_eq!(response.scope, "a");
}

#[tokio::test]
async fn test_logout_everywhere_blocks_refresh() {
    for use_cache in [false, true] {
        let h = harness(use_cache).await;
        let issued = password_grant(&h, "alice", Some("delegated:profile:read")).await;

        tokio::time::sleep(Duration::from_millis(2)).await;
        h.guard.logout_everywhere("user-alice").await.unwrap();

        assert!(
            h.repository
                .get_access_token(&issued.access_token)
                .await
                .unwrap()
                .is_none()
        );
        let result = h
            .server
            .token(
                TokenRequest {
                    refresh_token: issued.refresh_token.clone(),
                    ..request("refresh_token")
                },
                basic("web", "web-secret"),
            )
            .await;
        assert!(matches!(result, Err(OAuthError::InvalidGrant(_))));

        // Signing in again works
        let again = password_grant(&h, "alice", Some("delegated:profile:read")).await;
        assert!(
            h.repository
                .get_access_token(&again.access_token)
                .await
                .unwrap()
                .is_some()
        );
    }
}

#[tokio::test]
async fn test_role_scope_change_invalidates_tokens() {
    for use_cache in [false, true] {
        let h = harness(use_cache).await;
        let issued = password_grant(&h, "bob", Some("a")).await;
        let alice_token = password_grant(&h, "alice", Some("delegated:profile:read")).await;

        tokio::time::sleep(Duration::from_millis(2)).await;
        h.roles
            .change_scope("regular", vec!["c".to_string(), "d".to_string()])
            .await
            .unwrap();

        assert!(
            h.repository
                .get_access_token(&issued.access_token)
                .await
                .unwrap()
                .is_none()
        );
        // Other roles are untouched
        assert!(
            h.repository
                .get_access_token(&alice_token.access_token)
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            h.store
                .get_role_invalidated_at("regular")
                .await
                .unwrap()
                .is_some()
        );
    }
}

#[tokio::test]
async fn test_revoke_by_either_token() {
    for use_cache in [false, true] {
        let h = harness(use_cache).await;

        let by_access = password_grant(&h, "alice", Some("delegated:profile:read")).await;
        assert!(h.server.revoke(&by_access.access_token).await.unwrap());
        assert!(
            h.repository
                .get_refresh_token(by_access.refresh_token.as_deref().unwrap())
                .await
                .unwrap()
                .is_none()
        );

        let by_refresh = password_grant(&h, "alice", Some("delegated:profile:read")).await;
        assert!(
            h.server
                .revoke(by_refresh.refresh_token.as_deref().unwrap())
                .await
                .unwrap()
        );
        assert!(
            h.repository
                .get_access_token(&by_refresh.access_token)
                .await
                .unwrap()
                .is_none()
        );

        assert!(!h.server.revoke("never-issued").await.unwrap());
    }
}

/// Serves authorization code lookups from a snapshot taken before any redemption,
/// the way two concurrent requests both see the row before either deletes it.
struct SnapshotCodeLookups {
    inner: Arc<dyn TokenRepository>,
    snapshot: Mutex<Option<AuthorizationCode>>,
}

#[async_trait]
impl TokenRepository for SnapshotCodeLookups {
    async fn save_token(
        &self,
        token: NewToken,
        client: &Client,
        user: &Principal,
    ) -> Result<Token, StorageError> {
        self.inner.save_token(token, client, user).await
    }

    async fn check_token(&self, token: Option<Token>) -> Result<Option<Token>, StorageError> {
        self.inner.check_token(token).await
    }

    async fn get_access_token(&self, access_token: &str) -> Result<Option<Token>, StorageError> {
        self.inner.get_access_token(access_token).await
    }

    async fn get_refresh_token(&self, refresh_token: &str) -> Result<Option<Token>, StorageError> {
        self.inner.get_refresh_token(refresh_token).await
    }

    async fn revoke_token(&self, token: Option<&Token>) -> Result<bool, StorageError> {
        self.inner.revoke_token(token).await
    }

    async fn save_authorization_code(
        &self,
        code: NewAuthorizationCode,
        client: &Client,
        user: &Principal,
    ) -> Result<AuthorizationCode, StorageError> {
        let saved = self.inner.save_authorization_code(code, client, user).await?;
        *self.snapshot.lock().unwrap() = Some(saved.clone());
        Ok(saved)
    }

    async fn get_authorization_code(
        &self,
        code: &str,
    ) -> Result<Option<AuthorizationCode>, StorageError> {
        Ok(self
            .snapshot
            .lock()
            .unwrap()
            .clone()
            .filter(|snapshot| snapshot.authorization_code == code))
    }

    async fn revoke_authorization_code(
        &self,
        code: Option<&AuthorizationCode>,
    ) -> Result<bool, StorageError> {
        self.inner.revoke_authorization_code(code).await
    }

    async fn consume_authorization_code(
        &self,
        code: &AuthorizationCode,
    ) -> Result<bool, StorageError> {
        self.inner.consume_authorization_code(code).await
    }

    async fn get_client(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> Result<Option<Client>, StorageError> {
        self.inner.get_client(client_id, client_secret).await
    }
}

#[tokio::test]
async fn test_code_redeemed_by_racing_requests_mints_once() {
    for use_cache in [false, true] {
        let h = harness(use_cache).await;
        let racing: Arc<dyn TokenRepository> = Arc::new(SnapshotCodeLookups {
            inner: h.repository.clone(),
            snapshot: Mutex::new(None),
        });
        let role_cache = Arc::new(RoleCache::new(h.store.clone()));
        role_cache.refresh().await.unwrap();
        let server = AuthorizationServer::new(
            racing,
            Arc::new(ScopeAuthority::new(role_cache, vec![])),
            h.store.clone(),
            TokenLifetimes::default(),
        );

        let redirect = server
            .authorize(
                AuthorizationRequest {
                    client_id: "spa".to_string(),
                    redirect_uri: REDIRECT_URI.to_string(),
                    scope: Some("delegated:profile:read".to_string()),
                    state: None,
                    code_challenge: None,
                    code_challenge_method: None,
                },
                &alice(),
            )
            .await
            .unwrap();
        let exchange = TokenRequest {
            code: Some(code_from(&redirect)),
            redirect_uri: Some(REDIRECT_URI.to_string()),
            client_id: Some("spa".to_string()),
            ..request("authorization_code")
        };

        assert!(server.token(exchange.clone(), None).await.is_ok());
        let second = server.token(exchange, None).await;
        assert!(matches!(second, Err(OAuthError::InvalidGrant(_))));
    }
}
