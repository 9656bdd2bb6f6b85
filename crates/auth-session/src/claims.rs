//! Token claims and unverified decoding.
//!
//! [`decode`] reads the payload segment of a token without checking its
//! signature. The result is only good for deciding *when* to refresh.
//! Authorization decisions go through [`crate::verifier`].

use crate::errors::AuthError;
use common::jwt::decode_payload;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Claims carried by bearer and refresh tokens.
///
/// The `sub` field identifies the user and is redacted in Debug output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user identifier) - redacted in Debug output.
    pub sub: String,

    /// Role name. Bearer tokens carry one of `user`, `admin`, `superadmin`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Issued-at timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("sub", &"[REDACTED]")
            .field("role", &self.role)
            .field("exp", &self.exp)
            .field("iss", &self.iss)
            .field("iat", &self.iat)
            .finish()
    }
}

impl Claims {
    /// Seconds until `exp`, negative once expired.
    #[must_use]
    pub fn seconds_until_expiry(&self, now: i64) -> i64 {
        self.exp.saturating_sub(now)
    }

    /// Whether the token expires within `threshold` of `now` (or already has).
    ///
    /// Deterministic variant of the expiry check so boundaries can be tested
    /// without wall-clock dependence.
    #[must_use]
    pub fn expires_within(&self, threshold: Duration, now: i64) -> bool {
        let threshold_secs = i64::try_from(threshold.as_secs()).unwrap_or(i64::MAX);
        self.seconds_until_expiry(now) <= threshold_secs
    }
}

/// Decode a token's claims without verifying its signature.
///
/// # Errors
///
/// Returns `AuthError::MalformedToken` if the token does not have three
/// segments, the payload is not base64url, or the JSON lacks `sub`/`exp`.
pub fn decode(token: &str) -> Result<Claims, AuthError> {
    decode_payload::<Claims>(token).map_err(|e| {
        tracing::debug!(target: "auth.claims", error = %e, "Unverified claims decode failed");
        AuthError::from(e)
    })
}
