//! In-memory storage implementations
//!
//! This module provides in-memory implementations of all storage traits.
//! These implementations are suitable for development and testing.

mod credentials;

pub use credentials::MemoryCredentialStore;
