//! Deterministic cryptographic fixtures for testing
//!
//! Provides reproducible Ed25519 keypairs that sign tokens the session
//! client can verify. All fixtures are deterministic based on seed values.

use base64::engine::general_purpose;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::signature::{Ed25519KeyPair, KeyPair};
use thiserror::Error;

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("Token signing failed: {0}")]
    Signing(String),
}

/// DER prefix of an Ed25519 SubjectPublicKeyInfo (RFC 8410), followed by
/// the 32-byte public key.
const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Generate a deterministic Ed25519 signing key for testing.
///
/// The same seed always produces the same keypair, ensuring test reproducibility.
///
/// # Returns
/// * `Ok((public_key_pem, private_key_pkcs8))` - SPKI public key in PEM format,
///   private key in PKCS#8 DER
pub fn test_signing_key(seed: u8) -> Result<(String, Vec<u8>), FixtureError> {
    // Create deterministic 32-byte seed from input
    let mut seed_bytes = [0u8; 32];
    seed_bytes[0] = seed;
    for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
        *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
    }

    let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
        .map_err(|e| FixtureError::Crypto(format!("Failed to generate test keypair: {:?}", e)))?;

    let mut spki = ED25519_SPKI_PREFIX.to_vec();
    spki.extend_from_slice(key_pair.public_key().as_ref());

    let public_key_pem = format!(
        "-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----\n",
        general_purpose::STANDARD.encode(&spki)
    );

    Ok((public_key_pem, build_pkcs8_from_seed(&seed_bytes)))
}

/// Build PKCS#8 v1 document from Ed25519 seed
///
/// This is a test-only utility.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    // SEQUENCE { version INTEGER 0, AlgorithmIdentifier, OCTET STRING { OCTET STRING seed } }
    let mut pkcs8 = Vec::with_capacity(48);

    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    // OID 1.3.101.112 (Ed25519)
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);

    pkcs8
}

/// An Ed25519 key that signs test tokens.
///
/// # Example
/// ```rust,ignore
/// let key = TestSigningKey::from_seed(1);
/// let token = key.sign(&TestTokenBuilder::new().issued_by("auth-bearer").build())?;
/// verify_token(&token, key.public_key_pem(), Algorithm::EdDSA, "auth-bearer")?;
/// ```
pub struct TestSigningKey {
    public_key_pem: String,
    encoding_key: EncodingKey,
}

impl TestSigningKey {
    /// Deterministic key for `seed`. Panics if the fixture cannot be built.
    pub fn from_seed(seed: u8) -> Self {
        let (public_key_pem, pkcs8) =
            test_signing_key(seed).expect("deterministic test key should build");
        Self {
            public_key_pem,
            encoding_key: EncodingKey::from_ed_der(&pkcs8),
        }
    }

    /// SPKI PEM of the public half, as served by the key endpoints.
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Sign `claims` as an EdDSA JWT.
    pub fn sign(&self, claims: &serde_json::Value) -> Result<String, FixtureError> {
        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        encode(&header, claims, &self.encoding_key)
            .map_err(|e| FixtureError::Signing(e.to_string()))
    }
}
