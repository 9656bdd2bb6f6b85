//! Error types for the session token lifecycle.
//!
//! None of these errors are shown to an end user. Every failure path in the
//! session collapses to "not authorized"; the variants exist so that logs,
//! tests, and the retry policy can tell failures apart.

use crate::keys::TokenPurpose;
use common::jwt::JwtValidationError;
use thiserror::Error;

/// Errors produced while decoding, verifying, or refreshing session tokens.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Token is not three base64url segments with a parseable claims payload.
    #[error("token is malformed")]
    MalformedToken,

    /// Signature does not verify under the purpose's key and algorithm.
    #[error("token signature is invalid")]
    SignatureInvalid,

    /// The `iss` claim is missing or differs from the expected issuer.
    #[error("token issuer does not match")]
    IssuerMismatch,

    /// The `exp` claim is in the past.
    #[error("token has expired")]
    TokenExpired,

    /// No verification key is cached for the purpose.
    #[error("no verification key available for {0} tokens")]
    KeyMissing(TokenPurpose),

    /// Public key material could not be parsed for the configured algorithm.
    #[error("verification key is invalid: {0}")]
    InvalidKey(String),

    /// Fetching a purpose's public key from the backend failed.
    #[error("failed to fetch {purpose} public key: {reason}")]
    KeyFetch {
        /// Which key could not be fetched.
        purpose: TokenPurpose,
        /// Transport or parse failure description.
        reason: String,
    },

    /// Transport failure or server error during the refresh exchange.
    #[error("refresh exchange failed: {0}")]
    RefreshExchange(String),

    /// The backend refused the refresh exchange.
    #[error("refresh exchange rejected: {0}")]
    RefreshRejected(String),

    /// A refresh exchange attempt exceeded the configured timeout.
    #[error("refresh exchange timed out")]
    RefreshTimeout,

    /// The exchange was attempted without a refresh token and was refused.
    #[error("no refresh token available")]
    MissingRefreshToken,

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl AuthError {
    /// Whether the refresh exchange may be attempted again.
    ///
    /// Only transport-level failures qualify. A rejection or a token that
    /// fails verification will not change on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RefreshExchange(_) | Self::RefreshTimeout)
    }
}

impl From<JwtValidationError> for AuthError {
    fn from(_: JwtValidationError) -> Self {
        Self::MalformedToken
    }
}
