//! JWT structure utilities shared by the session crates.
//!
//! This module handles the *shape* of a compact JWT:
//! - Size limit enforced before any parsing
//! - Splitting into exactly three segments
//! - base64url decoding and JSON parsing of the unsigned payload
//!
//! Nothing here checks a signature. Values decoded by [`decode_payload`] are
//! untrusted and must only be used for housekeeping decisions such as
//! "is this token close to expiry". Signature verification lives in
//! `auth_session::verifier`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{decode_payload, MAX_JWT_SIZE_BYTES};
//!
//! #[derive(serde::Deserialize)]
//! struct Exp { exp: i64 }
//!
//! let Exp { exp } = decode_payload(token)?;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::de::DeserializeOwned;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum accepted JWT size in bytes (8KB).
///
/// Tokens larger than this are rejected before base64 decoding so an
/// oversized value from storage or the network cannot force large
/// allocations. Typical bearer tokens are 300-600 bytes.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while reading a JWT's structure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("token exceeds the maximum allowed size")]
    TokenTooLarge,

    /// Token is not three base64url segments carrying a JSON payload.
    #[error("token is malformed")]
    MalformedToken,
}

// =============================================================================
// Types
// =============================================================================

/// The three segments of a compact JWT, borrowed from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSegments<'a> {
    /// base64url JOSE header.
    pub header: &'a str,
    /// base64url claims payload.
    pub payload: &'a str,
    /// base64url signature.
    pub signature: &'a str,
}

// =============================================================================
// Functions
// =============================================================================

/// Split a compact JWT into its header, payload, and signature segments.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `MalformedToken` - Token does not have exactly three non-empty header
///   and payload segments
pub fn split_token(token: &str) -> Result<TokenSegments<'_>, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        tracing::debug!(target: "common.jwt", "Token rejected: expected three segments");
        return Err(JwtValidationError::MalformedToken);
    };

    if header.is_empty() || payload.is_empty() {
        tracing::debug!(target: "common.jwt", "Token rejected: empty header or payload segment");
        return Err(JwtValidationError::MalformedToken);
    }

    Ok(TokenSegments {
        header,
        payload,
        signature,
    })
}

/// Decode the unsigned payload segment of a JWT into `T`.
///
/// Performs no cryptographic check. The result is suitable for reading
/// housekeeping claims like `exp`, never for authorization decisions.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `MalformedToken` - Wrong segment count, invalid base64url, invalid JSON,
///   or JSON that does not fit `T`
pub fn decode_payload<T: DeserializeOwned>(token: &str) -> Result<T, JwtValidationError> {
    let segments = split_token(token)?;

    let payload_bytes = URL_SAFE_NO_PAD.decode(segments.payload).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT payload base64");
        JwtValidationError::MalformedToken
    })?;

    serde_json::from_slice(&payload_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT payload JSON");
        JwtValidationError::MalformedToken
    })
}

// =============================================================================
// Tests
// =============================================================================
