//! Token repository behaviour, exercised against both the database and the cache adapter.

use chrono::{Duration, Utc};
use idp::cache::{Cache, MemoryCache};
use idp::config::TokenLifetimes;
use idp::oauth::types::*;
use idp::oauth::{SessionGuard, TokenRepository, create_token_repository};
use idp::storage::{ClientStore, CredentialStore, MemoryCredentialStore, UserStore};
use std::sync::Arc;

struct Harness {
    store: Arc<MemoryCredentialStore>,
    guard: Arc<SessionGuard>,
    repository: Arc<dyn TokenRepository>,
    client: Client,
    alice: User,
}

const ADAPTERS: [bool; 2] = [false, true];

fn lifetimes() -> TokenLifetimes {
    TokenLifetimes {
        access_token: Duration::seconds(3600),
        refresh_token: Duration::seconds(86400),
        authorization_code: Duration::seconds(300),
    }
}

async fn harness(use_cache: bool) -> Harness {
    let store = Arc::new(MemoryCredentialStore::new());
    let store_dyn: Arc<dyn CredentialStore> = store.clone();
    let cache = Cache::Memory(MemoryCache::new());

    let guard = Arc::new(SessionGuard::new(
        store_dyn.clone(),
        use_cache.then(|| cache.clone()),
        std::time::Duration::from_secs(86400),
    ));
    let repository =
        create_token_repository(use_cache, store_dyn, cache, guard.clone(), lifetimes());

    let client = Client {
        id: "client-record".to_string(),
        client_id: "web".to_string(),
        client_secret: Some("web-secret".to_string()),
        name: None,
        role: EXTERNAL_CLIENT_ROLE.to_string(),
        scope: vec!["delegated:*".to_string()],
        grants: vec![
            GrantType::AuthorizationCode,
            GrantType::ClientCredentials,
            GrantType::RefreshToken,
        ],
        redirect_uris: vec!["https://app.example.com/callback".to_string()],
        created_at: Utc::now(),
    };
    store.store_client(&client).await.unwrap();

    let alice = User {
        id: "user-alice".to_string(),
        username: "alice".to_string(),
        email: None,
        password_hash: None,
        role: USER_ROLE.to_string(),
        scope: Some(vec!["delegated:profile:read".to_string()]),
        is_banned: false,
        is_restricted: false,
        global_logout_at: None,
        created_at: Utc::now(),
    };
    store.store_user(&alice).await.unwrap();

    Harness {
        store,
        guard,
        repository,
        client,
        alice,
    }
}

fn new_token(access_ttl: Duration, refresh_ttl: Option<Duration>) -> NewToken {
    let now = Utc::now();
    NewToken {
        access_token: generate_token(),
        access_token_expires_at: now + access_ttl,
        refresh_token: refresh_ttl.map(|_| generate_token()),
        refresh_token_expires_at: refresh_ttl.map(|ttl| now + ttl),
        scope: vec!["delegated:profile:read".to_string()],
    }
}

async fn save(h: &Harness) -> Token {
    h.repository
        .save_token(
            new_token(Duration::seconds(3600), Some(Duration::seconds(86400))),
            &h.client,
            &h.alice.principal(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_saved_token_round_trips() {
    for use_cache in ADAPTERS {
        let h = harness(use_cache).await;
        let saved = save(&h).await;
        assert!(matches!(saved.user, TokenUser::Reference { .. }));

        let found = h
            .repository
            .get_access_token(&saved.access_token)
            .await
            .unwrap()
            .expect("token should be live");
        assert_eq!(found.access_token, saved.access_token);
        assert_eq!(found.client.id, h.client.id);
        assert_eq!(found.scope, saved.scope);

        // The owner is resolved on read
        match &found.user {
            TokenUser::Loaded { user } => assert_eq!(user.username, "alice"),
            other => panic!("expected a loaded user, got {:?}", other),
        }

        let by_refresh = h
            .repository
            .get_refresh_token(saved.refresh_token.as_deref().unwrap())
            .await
            .unwrap();
        assert!(by_refresh.is_some());
    }
}

#[tokio::test]
async fn test_revocation_is_final_and_idempotent() {
    for use_cache in ADAPTERS {
        let h = harness(use_cache).await;
        let saved = save(&h).await;

        assert!(h.repository.revoke_token(Some(&saved)).await.unwrap());
        assert!(
            h.repository
                .get_access_token(&saved.access_token)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            h.repository
                .get_refresh_token(saved.refresh_token.as_deref().unwrap())
                .await
                .unwrap()
                .is_none()
        );

        // Revoking again is still a success
        assert!(h.repository.revoke_token(Some(&saved)).await.unwrap());
        assert!(!h.repository.revoke_token(None).await.unwrap());
    }
}

#[tokio::test]
async fn test_global_logout_kills_earlier_tokens_only() {
    for use_cache in ADAPTERS {
        let h = harness(use_cache).await;
        let saved = save(&h).await;

        // A logout mark at or before registration leaves the token alive
        let mut earlier = h.alice.clone();
        earlier.global_logout_at = Some(saved.registered_at);
        h.store.store_user(&earlier).await.unwrap();
        assert!(
            h.repository
                .check_token(Some(saved.clone()))
                .await
                .unwrap()
                .is_some()
        );

        let mut backdated = saved.clone();
        backdated.registered_at = Utc::now() - Duration::hours(1);
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        h.guard.logout_everywhere(&h.alice.id).await.unwrap();

        assert!(
            h.repository
                .check_token(Some(backdated))
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            h.repository
                .get_access_token(&saved.access_token)
                .await
                .unwrap()
                .is_none()
        );
    }
}

#[tokio::test]
async fn test_role_invalidation_kills_earlier_tokens_only() {
    for use_cache in ADAPTERS {
        let h = harness(use_cache).await;
        let saved = save(&h).await;

        // No invalidation recorded
        assert!(
            h.repository
                .check_token(Some(saved.clone()))
                .await
                .unwrap()
                .is_some()
        );

        let mut backdated = saved.clone();
        backdated.registered_at = Utc::now() - Duration::hours(1);
        h.guard.invalidate_role(USER_ROLE).await.unwrap();
        assert!(
            h.repository
                .check_token(Some(backdated))
                .await
                .unwrap()
                .is_none()
        );

        // Registered after the invalidation
        let fresh = save(&h).await;
        assert!(
            h.repository
                .get_access_token(&fresh.access_token)
                .await
                .unwrap()
                .is_some()
        );
    }
}

#[tokio::test]
async fn test_authorization_code_is_single_use() {
    for use_cache in ADAPTERS {
        let h = harness(use_cache).await;
        let code = h
            .repository
            .save_authorization_code(
                NewAuthorizationCode {
                    authorization_code: generate_token(),
                    expires_at: Utc::now() + Duration::seconds(300),
                    redirect_uri: "https://app.example.com/callback".to_string(),
                    code_challenge: None,
                    code_challenge_method: None,
                    scope: vec!["delegated:profile:read".to_string()],
                },
                &h.client,
                &h.alice.principal(),
            )
            .await
            .unwrap();

        let found = h
            .repository
            .get_authorization_code(&code.authorization_code)
            .await
            .unwrap()
            .expect("code should be live");
        assert_eq!(found.client.client_id, "web");

        assert!(
            h.repository
                .revoke_authorization_code(Some(&found))
                .await
                .unwrap()
        );
        assert!(
            h.repository
                .get_authorization_code(&code.authorization_code)
                .await
                .unwrap()
                .is_none()
        );
    }
}

#[tokio::test]
async fn test_authorization_code_is_consumed_once() {
    for use_cache in ADAPTERS {
        let h = harness(use_cache).await;
        let code = h
            .repository
            .save_authorization_code(
                NewAuthorizationCode {
                    authorization_code: generate_token(),
                    expires_at: Utc::now() + Duration::seconds(300),
                    redirect_uri: "https://app.example.com/callback".to_string(),
                    code_challenge: None,
                    code_challenge_method: None,
                    scope: vec![],
                },
                &h.client,
                &h.alice.principal(),
            )
            .await
            .unwrap();

        // Both callers looked the code up before either removed it
        let first = h.repository.consume_authorization_code(&code).await.unwrap();
        let second = h.repository.consume_authorization_code(&code).await.unwrap();
        assert!(first);
        assert!(!second);

        // Public revocation stays idempotent
        assert!(h.repository.revoke_authorization_code(Some(&code)).await.unwrap());
    }
}

#[tokio::test]
async fn test_access_expiry_leaves_refresh_usable() {
    for use_cache in ADAPTERS {
        let h = harness(use_cache).await;

        // Issued 3601 seconds ago with a one hour access and one day refresh lifetime
        let fresh = save(&h).await;
        assert!(
            h.repository
                .get_access_token(&fresh.access_token)
                .await
                .unwrap()
                .is_some()
        );

        let aged = h
            .repository
            .save_token(
                new_token(Duration::seconds(-1), Some(Duration::seconds(86400 - 3601))),
                &h.client,
                &h.alice.principal(),
            )
            .await
            .unwrap();

        assert!(
            h.repository
                .get_access_token(&aged.access_token)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            h.repository
                .get_refresh_token(aged.refresh_token.as_deref().unwrap())
                .await
                .unwrap()
                .is_some()
        );
    }
}

#[tokio::test]
async fn test_client_principal_is_embedded() {
    for use_cache in ADAPTERS {
        let h = harness(use_cache).await;
        let principal = h.client.principal();
        assert_eq!(principal.id, h.client.id);
        assert_eq!(principal.username, h.client.client_id);
        assert_eq!(principal.role, h.client.role);
        assert_eq!(principal.scope.as_deref(), Some(h.client.scope.as_slice()));

        let saved = h
            .repository
            .save_token(new_token(Duration::seconds(3600), None), &h.client, &principal)
            .await
            .unwrap();

        let found = h
            .repository
            .get_access_token(&saved.access_token)
            .await
            .unwrap()
            .unwrap();
        match found.user {
            TokenUser::Embedded { principal: embedded } => assert_eq!(embedded, principal),
            other => panic!("expected an embedded principal, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_deleted_owner_makes_token_dead() {
    let h = harness(false).await;
    let mut orphan = save(&h).await;
    orphan.user = TokenUser::Reference {
        id: "user-gone".to_string(),
    };

    assert!(h.repository.check_token(Some(orphan)).await.unwrap().is_none());
    assert!(h.repository.check_token(None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_get_client_checks_secret() {
    for use_cache in ADAPTERS {
        let h = harness(use_cache).await;
        assert!(h.repository.get_client("web", None).await.unwrap().is_some());
        assert!(
            h.repository
                .get_client("web", Some("web-secret"))
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            h.repository
                .get_client("web", Some("wrong"))
                .await
                .unwrap()
                .is_none()
        );
        assert!(h.repository.get_client("nope", None).await.unwrap().is_none());
    }
}
