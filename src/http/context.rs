//! Application state shared by every handler.

use axum::extract::FromRef;
use std::sync::Arc;

use crate::oauth::auth_server::AuthorizationServer;
use crate::oauth::invalidation::SessionGuard;
use crate::oauth::repository::TokenRepository;
use crate::oauth::scope::ScopeAuthority;

#[derive(Clone)]
pub struct AppState {
    /// Grant orchestration for the token endpoint
    pub auth_server: Arc<AuthorizationServer>,
    /// Token lookups for bearer authentication
    pub repository: Arc<dyn TokenRepository>,
    pub scopes: Arc<ScopeAuthority>,
    pub guard: Arc<SessionGuard>,
}

impl FromRef<AppState> for Arc<AuthorizationServer> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth_server.clone()
    }
}
