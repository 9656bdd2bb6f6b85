//! Secret types for keeping session credentials out of logs.
//!
//! Bearer and refresh tokens are credentials in their own right: anyone who
//! reads one from a log can act as the session until it expires. Every token
//! held by the session layer is therefore wrapped in [`SecretString`] from the
//! [`secrecy`] crate, whose `Debug` output is redacted and whose memory is
//! zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct TokenPair {
//!     access_token: SecretString,
//!     refresh_token: SecretString,
//! }
//!
//! let pair = TokenPair {
//!     access_token: SecretString::from("eyJhbGciOi..."),
//!     refresh_token: SecretString::from("eyJraWQiOi..."),
//! };
//!
//! // Safe: both fields print as redacted
//! println!("{pair:?}");
//!
//! // Reading the value is always an explicit, greppable call
//! let header = format!("Bearer {}", pair.access_token.expose_secret());
//! # assert!(header.starts_with("Bearer "));
//! ```

pub use secrecy::{ExposeSecret, SecretString};

/// Treat an empty or whitespace-only secret as absent.
///
/// Storage collaborators commonly hand back `""` for a missing cookie or
/// entry. The session layer models absence as `None`, so values pass through
/// this filter on the way in.
#[must_use]
pub fn non_empty(secret: Option<SecretString>) -> Option<SecretString> {
    secret.filter(|s| !s.expose_secret().trim().is_empty())
}
