//! Bearer token authentication for protected endpoints.
//!
//! Resolves `Authorization: Bearer <token>` through the token repository, so
//! expired, revoked, logged-out, and role-invalidated tokens are all rejected
//! the same way.

use crate::http::AppState;
use crate::oauth::scope::SessionContext;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use http::request::Parts;
use serde_json::json;

/// Authenticated session extractor
///
/// # Example
///
/// ```ignore
/// use idp::http::middleware_auth::ExtractedAuth;
///
/// async fn protected_handler(ExtractedAuth(session): ExtractedAuth) -> String {
///     session.token.user.id().to_string()
/// }
/// ```
#[derive(Clone, Debug)]
pub struct ExtractedAuth(pub SessionContext);

/// Create a standard OAuth 2.0 error response
pub(crate) fn create_oauth_error_response(
    status: StatusCode,
    error: &str,
    error_description: &str,
) -> Response {
    let body = json!({
        "error": error,
        "error_description": error_description
    });

    (status, axum::Json(body)).into_response()
}

impl<S> FromRequestParts<S> for ExtractedAuth
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);

        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| {
                create_oauth_error_response(
                    StatusCode::UNAUTHORIZED,
                    "invalid_request",
                    "Missing Authorization header",
                )
            })?;

        let access_token = match auth_header.split_once(' ') {
            Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() => {
                token.trim()
            }
            _ => {
                return Err(create_oauth_error_response(
                    StatusCode::UNAUTHORIZED,
                    "invalid_request",
                    "Invalid Authorization header format",
                ));
            }
        };

        let token = app_state
            .repository
            .get_access_token(access_token)
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, "Failed to resolve bearer token");
                create_oauth_error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "server_error",
                    "Failed to resolve access token",
                )
            })?
            .ok_or_else(|| {
                create_oauth_error_response(
                    StatusCode::UNAUTHORIZED,
                    "invalid_token",
                    "Access token not found or expired",
                )
            })?;

        let session = SessionContext::new(token);
        if session.user().is_some_and(|user| user.is_banned) {
            return Err(create_oauth_error_response(
                StatusCode::FORBIDDEN,
                "access_denied",
                "Account is banned",
            ));
        }

        Ok(ExtractedAuth(session))
    }
}

/// Reject the request unless the session's scope covers `permission`
pub fn require_scope(
    state: &AppState,
    session: &SessionContext,
    permission: &str,
) -> Result<(), Response> {
    if state.scopes.is_scope_allowed_for_session(permission, session) {
        Ok(())
    } else {
        tracing::debug!(permission, "Session scope does not cover permission");
        Err(create_oauth_error_response(
            StatusCode::FORBIDDEN,
            "insufficient_scope",
            &format!("Requires {}", permission),
        ))
    }
}
