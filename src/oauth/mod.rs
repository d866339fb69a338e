//! OAuth2 token core: grant orchestration, token repository, scope authority, and invalidation.

pub mod auth_server;
pub mod invalidation;
pub mod repository;
pub mod roles;
pub mod scope;
pub mod types;

// Re-export frequently used items from each module
pub use auth_server::{AuthorizationServer, ClientAuthentication};
pub use invalidation::{SessionGuard, is_token_invalidated};
pub use repository::{
    CacheTokenRepository, DatabaseTokenRepository, TokenRepository, create_token_repository,
};
pub use roles::{RoleCache, RoleService};
pub use scope::{ScopeAuthority, SessionContext, can_request_scope, verify_scope};
pub use types::{
    AuthorizationCode, AuthorizationRequest, Client, GrantType, Principal, Role, Token,
    TokenRequest, TokenResponse, TokenUser, User, parse_scope,
};
