//! Axum HTTP handlers and middleware for the token endpoint and protected API.

pub mod context;
mod handler_oauth;
mod handler_userinfo;
pub mod middleware_auth;
pub mod server;

pub use context::AppState;
pub use server::build_router;
