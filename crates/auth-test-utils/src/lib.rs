//! # Auth Test Utilities
//!
//! Shared test utilities for the session client.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (fixed Ed25519 keys for reproducible tests)
//! - Test data builders (`TestTokenBuilder`)
//! - A wiremock-backed auth backend (`MockAuthBackend`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use auth_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let backend = MockAuthBackend::start().await;
//!
//!     let token = backend.bearer_token("alice", "admin", 3600);
//!     backend.respond_to_refresh_with(&token, &backend.refresh_token("alice")).await;
//! }
//! ```

pub mod crypto_fixtures;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use server_harness::*;
pub use token_builders::*;
