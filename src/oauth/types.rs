//! OAuth2 core types and data structures.
//!
//! Defines principals, roles, tokens, authorization codes, and the request and
//! response shapes of the token endpoint.

use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::OAuthError;

/// Role id of the seeded super administrator role
pub const SUPER_ADMIN_ROLE: &str = "super_admin";
/// Role id of the seeded administrator role
pub const ADMIN_ROLE: &str = "admin";
/// Role id of the seeded regular user role
pub const USER_ROLE: &str = "user";
/// Role id of first-party clients trusted with the user's full entitlement
pub const INTERNAL_CLIENT_ROLE: &str = "internal_client";
/// Role id of third-party clients
pub const EXTERNAL_CLIENT_ROLE: &str = "external_client";

/// Ids of the roles seeded at startup
pub const SYSTEM_ROLES: &[&str] = &[
    SUPER_ADMIN_ROLE,
    ADMIN_ROLE,
    USER_ROLE,
    INTERNAL_CLIENT_ROLE,
    EXTERNAL_CLIENT_ROLE,
];

/// OAuth2 Grant Types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
    ClientCredentials,
    Password,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::RefreshToken => "refresh_token",
            GrantType::ClientCredentials => "client_credentials",
            GrantType::Password => "password",
        }
    }

    /// Whether tokens minted by this grant carry a refresh token
    pub fn issues_refresh_token(&self) -> bool {
        !matches!(self, GrantType::ClientCredentials)
    }
}

impl FromStr for GrantType {
    type Err = OAuthError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "refresh_token" => Ok(GrantType::RefreshToken),
            "client_credentials" => Ok(GrantType::ClientCredentials),
            "password" => Ok(GrantType::Password),
            _ => Err(OAuthError::UnsupportedGrantType(value.to_string())),
        }
    }
}

/// Kind of principal a role applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    User,
    Client,
}

impl RoleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleKind::User => "user",
            RoleKind::Client => "client",
        }
    }
}

/// Named set of permissions; lower ranking means more privileged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub ranking: i32,
    pub scope: Vec<String>,
    pub kind: RoleKind,
    pub description: Option<String>,
}

impl Role {
    pub fn is_system_role(&self) -> bool {
        is_system_role(&self.id)
    }
}

pub fn is_system_role(role_id: &str) -> bool {
    SYSTEM_ROLES.contains(&role_id)
}

/// Seeded roles with their initial scope
pub fn system_roles() -> Vec<Role> {
    let role = |id: &str, name: &str, ranking: i32, scope: &[&str], kind: RoleKind| Role {
        id: id.to_string(),
        name: name.to_string(),
        ranking,
        scope: scope.iter().map(|s| s.to_string()).collect(),
        kind,
        description: None,
    };

    vec![
        role(SUPER_ADMIN_ROLE, "Super Admin", 0, &["*"], RoleKind::User),
        role(
            ADMIN_ROLE,
            "Admin",
            10,
            &["admin:*", "delegated:*"],
            RoleKind::User,
        ),
        role(USER_ROLE, "User", 100, &["delegated:*"], RoleKind::User),
        role(INTERNAL_CLIENT_ROLE, "Internal Client", 50, &["*"], RoleKind::Client),
        role(
            EXTERNAL_CLIENT_ROLE,
            "External Client",
            200,
            &["delegated:*"],
            RoleKind::Client,
        ),
    ]
}

/// Anything carrying a permission scope list
pub trait Scoped {
    fn scope(&self) -> &[String];
}

/// Minimal capability set shared by users and clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub username: String,
    pub role: String,
    /// Explicit scope; `None` when nothing was ever recorded for the principal
    pub scope: Option<Vec<String>>,
}

impl Scoped for Principal {
    fn scope(&self) -> &[String] {
        self.scope.as_deref().unwrap_or_default()
    }
}

/// Human account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    /// bcrypt hash; never leaves the credential store
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub role: String,
    pub scope: Option<Vec<String>>,
    pub is_banned: bool,
    pub is_restricted: bool,
    pub global_logout_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn principal(&self) -> Principal {
        Principal {
            id: self.id.clone(),
            username: self.username.clone(),
            role: self.role.clone(),
            scope: self.scope.clone(),
        }
    }
}

impl Scoped for User {
    fn scope(&self) -> &[String] {
        self.scope.as_deref().unwrap_or_default()
    }
}

/// Registered OAuth client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    /// Record id
    pub id: String,
    /// Public client identifier
    pub client_id: String,
    pub client_secret: Option<String>,
    pub name: Option<String>,
    pub role: String,
    pub scope: Vec<String>,
    pub grants: Vec<GrantType>,
    pub redirect_uris: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Client {
    /// Identity used when the client acts on its own behalf
    pub fn principal(&self) -> Principal {
        Principal {
            id: self.id.clone(),
            username: self.client_id.clone(),
            role: self.role.clone(),
            scope: Some(self.scope.clone()),
        }
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            id: self.id.clone(),
            client_id: self.client_id.clone(),
            grants: self.grants.clone(),
            role: self.role.clone(),
        }
    }

    pub fn allows_grant(&self, grant: GrantType) -> bool {
        self.grants.contains(&grant)
    }
}

impl Scoped for Client {
    fn scope(&self) -> &[String] {
        &self.scope
    }
}

/// Client fields embedded in tokens and codes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSnapshot {
    pub id: String,
    pub client_id: String,
    pub grants: Vec<GrantType>,
    pub role: String,
}

/// Owner of a token or code.
///
/// Human users are stored by reference and resolved on read; application
/// clients have no profile to re-fetch and are stored in full.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenUser {
    Reference { id: String },
    Embedded { principal: Principal },
    /// Produced by liveness checks only, never persisted
    Loaded { user: User },
}

impl TokenUser {
    /// Choose the stored form for `principal` acting through `client`
    pub fn for_principal(principal: &Principal, client: &Client) -> Self {
        if principal.id == client.id {
            TokenUser::Embedded {
                principal: principal.clone(),
            }
        } else {
            TokenUser::Reference {
                id: principal.id.clone(),
            }
        }
    }

    pub fn id(&self) -> &str {
        match self {
            TokenUser::Reference { id } => id,
            TokenUser::Embedded { principal } => &principal.id,
            TokenUser::Loaded { user } => &user.id,
        }
    }

    /// Principal behind the token, unavailable for unresolved references
    pub fn principal(&self) -> Option<Principal> {
        match self {
            TokenUser::Reference { .. } => None,
            TokenUser::Embedded { principal } => Some(principal.clone()),
            TokenUser::Loaded { user } => Some(user.principal()),
        }
    }

    pub fn is_application_client(&self) -> bool {
        matches!(self, TokenUser::Embedded { .. })
    }

    /// Form written to a store
    pub fn stored(&self) -> TokenUser {
        match self {
            TokenUser::Loaded { user } => TokenUser::Reference {
                id: user.id.clone(),
            },
            other => other.clone(),
        }
    }
}

/// Token fields supplied by a grant before the repository stamps ownership
#[derive(Debug, Clone)]
pub struct NewToken {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: Option<String>,
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    pub scope: Vec<String>,
}

/// Issued access/refresh token pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: Option<String>,
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    pub scope: Vec<String>,
    pub client: ClientSnapshot,
    pub user: TokenUser,
    pub registered_at: DateTime<Utc>,
}

impl Token {
    pub fn is_access_token_expired(&self, now: DateTime<Utc>) -> bool {
        self.access_token_expires_at <= now
    }

    pub fn is_refresh_token_expired(&self, now: DateTime<Utc>) -> bool {
        self.refresh_token_expires_at
            .is_none_or(|expires_at| expires_at <= now)
    }
}

/// Code fields supplied by the authorize step
#[derive(Debug, Clone)]
pub struct NewAuthorizationCode {
    pub authorization_code: String,
    pub expires_at: DateTime<Utc>,
    pub redirect_uri: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub scope: Vec<String>,
}

/// OAuth Authorization Code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub authorization_code: String,
    pub expires_at: DateTime<Utc>,
    pub redirect_uri: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub scope: Vec<String>,
    pub client: ClientSnapshot,
    pub user: TokenUser,
    pub created_at: DateTime<Utc>,
}

/// OAuth Authorization Request
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// Token Exchange Request
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub scope: Option<String>,
}

/// Token Response
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
}

impl TokenResponse {
    pub fn from_token(token: &Token, now: DateTime<Utc>) -> Self {
        Self {
            access_token: token.access_token.clone(),
            token_type: "Bearer".to_string(),
            expires_in: (token.access_token_expires_at - now).num_seconds().max(0),
            refresh_token: token.refresh_token.clone(),
            scope: token.scope.join(" "),
        }
    }
}

/// OAuth Error Response
#[derive(Debug, Serialize, Deserialize)]
pub struct OAuthErrorResponse {
    pub error: String,
    pub error_description: Option<String>,
}

/// Generate a secure random token
pub fn generate_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.r#gen();
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a record id
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Parse a space separated scope string, dropping duplicates and keeping order
pub fn parse_scope(scope: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    scope
        .split_whitespace()
        .filter(|s| seen.insert(*s))
        .map(|s| s.to_string())
        .collect()
}
