//! Handles GET /api/me and POST /api/logout-everywhere

use axum::{extract::State, http::StatusCode, response::Json, response::Response};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::context::AppState;
use crate::http::middleware_auth::{ExtractedAuth, create_oauth_error_response, require_scope};
use crate::oauth::types::TokenUser;

/// Permission needed to read the caller's own profile
pub const PROFILE_READ_SCOPE: &str = "delegated:profile:read";

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub role: String,
    pub is_restricted: bool,
    pub application_client: bool,
    /// Scope granted to the presented token
    pub scope: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct LogoutEverywhereResponse {
    pub logged_out_at: DateTime<Utc>,
}

/// GET /api/me
pub async fn get_me_handler(
    State(state): State<AppState>,
    ExtractedAuth(session): ExtractedAuth,
) -> Result<Json<MeResponse>, Response> {
    require_scope(&state, &session, PROFILE_READ_SCOPE)?;

    let scope = session.scope().to_vec();
    let response = match &session.token.user {
        TokenUser::Loaded { user } => MeResponse {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role.clone(),
            is_restricted: user.is_restricted,
            application_client: false,
            scope,
        },
        TokenUser::Embedded { principal } => MeResponse {
            id: principal.id.clone(),
            username: principal.username.clone(),
            email: None,
            role: principal.role.clone(),
            is_restricted: false,
            application_client: true,
            scope,
        },
        TokenUser::Reference { .. } => {
            return Err(create_oauth_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "Token owner was not resolved",
            ));
        }
    };

    Ok(Json(response))
}

/// POST /api/logout-everywhere
///
/// Every token the caller holds, including the presented one, stops working.
pub async fn logout_everywhere_handler(
    State(state): State<AppState>,
    ExtractedAuth(session): ExtractedAuth,
) -> Result<Json<LogoutEverywhereResponse>, Response> {
    let user = session.user().ok_or_else(|| {
        create_oauth_error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "Application clients cannot log out",
        )
    })?;

    let logged_out_at = state.guard.logout_everywhere(&user.id).await.map_err(|e| {
        tracing::error!(user_id = %user.id, error = ?e, "Failed to log out everywhere");
        create_oauth_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "server_error",
            "Failed to log out everywhere",
        )
    })?;

    Ok(Json(LogoutEverywhereResponse { logged_out_at }))
}
