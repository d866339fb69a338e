//! Handles POST /oauth/token and POST /oauth/revoke

use axum::{
    Form, Json,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::errors::OAuthError;
use crate::oauth::auth_server::{AuthorizationServer, parse_basic_auth};
use crate::oauth::types::{TokenRequest, TokenResponse};

/// Form data for the revocation endpoint
#[derive(Debug, Deserialize)]
pub struct RevokeForm {
    pub token: String,
}

/// POST /oauth/token
pub async fn handle_oauth_token(
    State(auth_server): State<Arc<AuthorizationServer>>,
    headers: HeaderMap,
    Form(request): Form<TokenRequest>,
) -> Result<Json<TokenResponse>, OAuthError> {
    let client_auth = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_basic_auth);

    let response = auth_server.token(request, client_auth).await?;
    Ok(Json(response))
}

/// POST /oauth/revoke
///
/// Unknown and already revoked tokens still succeed.
pub async fn handle_oauth_revoke(
    State(auth_server): State<Arc<AuthorizationServer>>,
    Form(form): Form<RevokeForm>,
) -> Result<StatusCode, OAuthError> {
    let revoked = auth_server.revoke(&form.token).await?;
    tracing::debug!(revoked, "Revocation request handled");
    Ok(StatusCode::OK)
}
