//! Scope authority: which scope may be granted, and what a granted scope allows.
//!
//! Scope entries are colon segmented strings such as `delegated:profile:read`.
//! A granted `*` covers everything, a granted `a:b:*` covers every entry that
//! starts with `a:b:`, anything else only covers itself.

use crate::oauth::roles::RoleCache;
use crate::oauth::types::*;
use std::collections::HashSet;
use std::sync::Arc;

/// Whether a single granted entry covers a requested one
pub fn scope_covers(granted: &str, requested: &str) -> bool {
    if granted == "*" {
        return true;
    }
    match granted.strip_suffix('*') {
        Some(prefix) if prefix.ends_with(':') => requested.starts_with(prefix),
        _ => granted == requested,
    }
}

/// True iff every requested entry is covered by some entry of `principal`
pub fn can_request_scope(requested: &[String], principal: &impl Scoped) -> bool {
    let granted = principal.scope();
    requested
        .iter()
        .all(|entry| granted.iter().any(|g| scope_covers(g, entry)))
}

/// Exact containment check against a token's already-narrowed scope.
///
/// A token without scope verifies nothing.
pub fn verify_scope(token: &Token, requested: &[String]) -> bool {
    !token.scope.is_empty() && requested.iter().all(|entry| token.scope.contains(entry))
}

/// Authenticated request context built from a live access token
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub token: Token,
}

impl SessionContext {
    pub fn new(token: Token) -> Self {
        Self { token }
    }

    pub fn scope(&self) -> &[String] {
        &self.token.scope
    }

    /// Loaded user behind the token, `None` for application clients
    pub fn user(&self) -> Option<&User> {
        match &self.token.user {
            TokenUser::Loaded { user } => Some(user),
            _ => None,
        }
    }
}

/// Decides the scope granted to a principal acting through a client
pub struct ScopeAuthority {
    roles: Arc<RoleCache>,
    default_scope: Vec<String>,
}

impl ScopeAuthority {
    pub fn new(roles: Arc<RoleCache>, default_scope: Vec<String>) -> Self {
        Self {
            roles,
            default_scope,
        }
    }

    /// Scope to grant, or `None` when the request must be refused
    pub async fn validate_scope(
        &self,
        user: &Principal,
        client: &Client,
        requested: &[String],
    ) -> Option<Vec<String>> {
        if !can_request_scope(requested, client) {
            tracing::debug!(client_id = %client.client_id, ?requested, "Scope exceeds client ceiling");
            return None;
        }

        // No delegated user behind a client-credentials grant
        if user.id == client.id {
            return Some(requested.to_vec());
        }

        let user_scope = user
            .scope
            .clone()
            .unwrap_or_else(|| self.default_scope.clone());

        if client.role == INTERNAL_CLIENT_ROLE {
            let role_scope = self.roles.scope_of(&user.role).await;
            let mut seen = HashSet::new();
            return Some(
                user_scope
                    .into_iter()
                    .chain(role_scope)
                    .filter(|entry| seen.insert(entry.clone()))
                    .collect(),
            );
        }

        let principal = Principal {
            scope: Some(user_scope),
            ..user.clone()
        };
        if can_request_scope(requested, &principal) {
            Some(requested.to_vec())
        } else {
            tracing::debug!(user_id = %user.id, ?requested, "Scope exceeds user entitlement");
            None
        }
    }

    /// Whether the session's granted scope covers `permission`
    pub fn is_scope_allowed_for_session(&self, permission: &str, session: &SessionContext) -> bool {
        session
            .scope()
            .iter()
            .any(|granted| scope_covers(granted, permission))
    }
}
