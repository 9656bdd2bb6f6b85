//! Signature and issuer verification for session tokens.
//!
//! Pure functions: nothing here touches session state or the network.
//!
//! # Security
//!
//! - Only the algorithm configured for the token purpose is accepted; a token
//!   whose header names another algorithm fails as `SignatureInvalid`
//! - The `iss` claim must be present and equal the purpose's issuer
//! - `exp` is enforced, so an expired token never counts as verified
//! - Failure details are logged at debug level only

use crate::claims::Claims;
use crate::errors::AuthError;
use crate::keys::{TokenPurpose, VerificationKey};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

/// Clock skew tolerated on `exp`, in seconds.
pub const EXPIRY_LEEWAY_SECS: u64 = 0;

/// Build a decoding key from PEM public key material for `algorithm`.
///
/// # Errors
///
/// Returns `AuthError::InvalidKey` when the PEM cannot be parsed as a key of
/// the algorithm's family, or when the algorithm is symmetric.
pub fn decoding_key_from_pem(pem: &str, algorithm: Algorithm) -> Result<DecodingKey, AuthError> {
    let bytes = pem.as_bytes();
    let result = match algorithm {
        Algorithm::EdDSA => DecodingKey::from_ed_pem(bytes),
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(bytes),
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => DecodingKey::from_rsa_pem(bytes),
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            return Err(AuthError::InvalidKey(format!(
                "{algorithm:?} is not an asymmetric algorithm"
            )));
        }
    };

    result.map_err(|e| {
        tracing::debug!(target: "auth.verifier", error = %e, ?algorithm, "Public key rejected");
        AuthError::InvalidKey(format!("not a valid {algorithm:?} public key"))
    })
}

/// Verify `token` against PEM key material, algorithm, and issuer.
///
/// # Errors
///
/// - `InvalidKey` - `public_key_pem` is unusable for `algorithm`
/// - `SignatureInvalid` - bad signature or unexpected header algorithm
/// - `IssuerMismatch` - `iss` missing or different from `expected_issuer`
/// - `TokenExpired` - `exp` in the past
/// - `MalformedToken` - structure or claims cannot be parsed
pub fn verify_token(
    token: &str,
    public_key_pem: &str,
    algorithm: Algorithm,
    expected_issuer: &str,
) -> Result<Claims, AuthError> {
    let key = decoding_key_from_pem(public_key_pem, algorithm)?;
    verify_with(token, &key, algorithm, expected_issuer)
}

/// Verify `token` with the cached key for `purpose`.
///
/// # Errors
///
/// Returns `AuthError::KeyMissing` when `key` is `None`, otherwise the same
/// errors as [`verify_token`].
pub fn verify(
    token: &str,
    purpose: TokenPurpose,
    key: Option<&VerificationKey>,
) -> Result<Claims, AuthError> {
    let Some(key) = key else {
        tracing::debug!(target: "auth.verifier", %purpose, "No verification key cached");
        return Err(AuthError::KeyMissing(purpose));
    };

    verify_with(token, key.decoding_key(), key.algorithm(), key.issuer())
}

fn verify_with(
    token: &str,
    key: &DecodingKey,
    algorithm: Algorithm,
    expected_issuer: &str,
) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = true;
    validation.leeway = EXPIRY_LEEWAY_SECS;
    validation.set_required_spec_claims(&["exp", "iss"]);
    validation.set_issuer(&[expected_issuer]);

    let token_data = decode::<Claims>(token, key, &validation).map_err(|e| {
        tracing::debug!(target: "auth.verifier", error = %e, "Token verification failed");
        map_jwt_error(e.kind())
    })?;

    Ok(token_data.claims)
}

fn map_jwt_error(kind: &ErrorKind) -> AuthError {
    match kind {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => AuthError::SignatureInvalid,
        ErrorKind::InvalidIssuer => AuthError::IssuerMismatch,
        ErrorKind::MissingRequiredClaim(claim) if claim == "iss" => AuthError::IssuerMismatch,
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::InvalidKeyFormat | ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidRsaKey(_) => {
            AuthError::InvalidKey("key does not match token algorithm".to_string())
        }
        _ => AuthError::MalformedToken,
    }
}
