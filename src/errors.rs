//! Standardized error types following the `error-idp-<domain>-<number>` format.

use axum::response::{IntoResponse, Response};
use http::StatusCode;
use thiserror::Error;

/// Configuration errors that occur during application startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error when a required environment variable is not set
    #[error("error-idp-config-1 {0} must be set")]
    EnvVarRequired(String),

    /// Error when PORT cannot be parsed
    #[error("error-idp-config-2 Parsing PORT into u16 failed: {0:?}")]
    PortParsingFailed(std::num::ParseIntError),

    /// Error when version information is not available
    #[error("error-idp-config-3 One of GIT_HASH or CARGO_PKG_VERSION must be set")]
    VersionNotSet,

    /// Error when duration string cannot be parsed
    #[error("error-idp-config-4 Failed to parse duration '{0}': {1}")]
    DurationParsingFailed(String, String),

    /// Error when boolean string cannot be parsed
    #[error(
        "error-idp-config-5 Failed to parse boolean '{0}': expected true/false/1/0/yes/no/on/off"
    )]
    BoolParsingFailed(String),

    /// Error when a lifetime is zero or negative
    #[error("error-idp-config-6 Lifetime '{0}' must be greater than zero")]
    InvalidLifetime(String),
}

/// OAuth-related errors
#[derive(Debug, Error)]
pub enum OAuthError {
    /// Invalid client credentials
    #[error("error-idp-oauth-1 Invalid client credentials: {0}")]
    InvalidClient(String),

    /// Invalid, expired, revoked or already redeemed grant
    #[error("error-idp-oauth-2 Invalid grant: {0}")]
    InvalidGrant(String),

    /// Unsupported grant type
    #[error("error-idp-oauth-3 Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    /// Invalid scope
    #[error("error-idp-oauth-4 Invalid scope: {0}")]
    InvalidScope(String),

    /// Invalid request
    #[error("error-idp-oauth-5 Invalid request: {0}")]
    InvalidRequest(String),

    /// Unauthorized client
    #[error("error-idp-oauth-6 Unauthorized client: {0}")]
    UnauthorizedClient(String),

    /// Server error
    #[error("error-idp-oauth-7 Server error: {0}")]
    ServerError(String),
}

impl OAuthError {
    /// OAuth 2.0 error code reported in the `error` field of a response
    pub fn error_code(&self) -> &'static str {
        match self {
            OAuthError::InvalidClient(_) => "invalid_client",
            OAuthError::InvalidGrant(_) => "invalid_grant",
            OAuthError::UnsupportedGrantType(_) => "unsupported_grant_type",
            OAuthError::InvalidScope(_) => "invalid_scope",
            OAuthError::InvalidRequest(_) => "invalid_request",
            OAuthError::UnauthorizedClient(_) => "unauthorized_client",
            OAuthError::ServerError(_) => "server_error",
        }
    }

    /// HTTP status used when the error is returned from the token endpoint
    pub fn status_code(&self) -> StatusCode {
        match self {
            OAuthError::InvalidClient(_)
            | OAuthError::InvalidGrant(_)
            | OAuthError::UnsupportedGrantType(_)
            | OAuthError::InvalidScope(_)
            | OAuthError::UnauthorizedClient(_) => StatusCode::UNAUTHORIZED,
            OAuthError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            OAuthError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for OAuthError {
    fn from(err: StorageError) -> Self {
        OAuthError::ServerError(err.to_string())
    }
}

/// Database/storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error when database connection fails
    #[error("error-idp-storage-1 Database connection failed: {0}")]
    ConnectionFailed(String),

    /// Error when database operation fails
    #[error("error-idp-storage-2 Database error: {0}")]
    DatabaseError(String),

    /// Error when data validation fails
    #[error("error-idp-storage-3 Invalid data: {0}")]
    InvalidData(String),

    /// Error when requested resource is not found
    #[error("error-idp-storage-4 Not found: {0}")]
    NotFound(String),

    /// Error raised by the cache backend
    #[error("error-idp-storage-5 Cache failure: {0}")]
    Cache(#[from] CacheError),
}

/// Cache backend errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// Error when a value cannot be serialized for the cache
    #[error("error-idp-cache-1 Failed to serialize value: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error when a cached value cannot be parsed back
    #[error("error-idp-cache-2 Failed to parse value for key {0}: {1}")]
    Deserialization(String, String),

    /// Error reported by Redis or the Redis pool
    #[error("error-idp-cache-3 Redis error: {0}")]
    Redis(String),

    /// Error when the cache cannot be configured
    #[error("error-idp-cache-4 Configuration error: {0}")]
    Config(String),
}

/// Role management errors
#[derive(Debug, Error)]
pub enum RoleError {
    /// Attempt to change the scope of a seeded system role
    #[error("error-idp-role-1 Scope of system role '{0}' cannot be changed")]
    SystemRoleScope(String),

    /// Attempt to delete a seeded system role
    #[error("error-idp-role-2 System role '{0}' cannot be deleted")]
    SystemRoleDeletion(String),

    /// Role does not exist
    #[error("error-idp-role-3 Role not found: {0}")]
    NotFound(String),

    /// Underlying storage failure
    #[error("error-idp-role-4 Role storage failed: {0}")]
    Storage(#[from] StorageError),
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        if matches!(self, OAuthError::ServerError(_)) {
            tracing::error!(error = ?self, "internal server error");
        }
        let body = crate::oauth::types::OAuthErrorResponse {
            error: self.error_code().to_string(),
            error_description: Some(self.to_string()),
        };
        (self.status_code(), axum::Json(body)).into_response()
    }
}
