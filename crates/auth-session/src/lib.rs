//! Session token lifecycle client.
//!
//! Holds a user's short-lived bearer token and long-lived refresh token,
//! verifies them against per-purpose public keys fetched from the auth
//! backend, and renews the pair before the bearer token expires.
//!
//! # Architecture
//!
//! ```text
//! session.rs -> coordinator.rs -> client.rs (exchange)
//!                              -> keys.rs -> client.rs (public keys)
//!                              -> verifier.rs, claims.rs
//! ```
//!
//! # Modules
//!
//! - `claims` - Unverified claim decoding and expiry math
//! - `client` - Backend contract and its HTTP implementation
//! - `config` - Configuration from environment
//! - `coordinator` - Single-flight refresh state machine
//! - `errors` - Error taxonomy
//! - `guard` - Role-based navigation decisions
//! - `keys` - Per-purpose verification key cache
//! - `session` - The `AuthSession` façade
//! - `store` - Persisted refresh token contract
//! - `verifier` - Signature and issuer verification

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod claims;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod guard;
pub mod keys;
pub mod session;
pub mod store;
pub mod verifier;

pub use coordinator::{RefreshOutcome, RefreshState};
pub use errors::AuthError;
pub use session::AuthSession;
