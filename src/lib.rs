//! OAuth2 identity provider core.
//!
//! Provides the token/authorization-code repository with database and cache
//! backends, scope authority, token invalidation, and the OAuth2 grant flows.

pub mod cache;
pub mod config;
pub mod errors;
pub mod http;
pub mod oauth;
pub mod storage;
