//! Main router configuration assembling the token endpoint and protected API.

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{
    context::AppState,
    handler_oauth::{handle_oauth_revoke, handle_oauth_token},
    handler_userinfo::{get_me_handler, logout_everywhere_handler},
};

/// Build the application router
pub fn build_router(ctx: AppState) -> Router {
    let oauth_routes = Router::new()
        .route("/token", post(handle_oauth_token))
        .route("/revoke", post(handle_oauth_revoke));

    // Protected API routes authenticate through the ExtractedAuth extractor
    let api_routes = Router::new()
        .route("/me", get(get_me_handler))
        .route("/logout-everywhere", post(logout_everywhere_handler));

    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            axum::http::header::ACCEPT,
        ]);

    Router::new()
        .nest("/oauth", oauth_routes)
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
