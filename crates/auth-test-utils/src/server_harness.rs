//! Mock auth backend for integration tests
//!
//! Provides `MockAuthBackend`, a wiremock server that serves the two public
//! key endpoints and a scripted refresh exchange, plus the signing keys
//! needed to mint tokens it will accept.

use crate::crypto_fixtures::TestSigningKey;
use crate::token_builders::TestTokenBuilder;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Issuer the mock backend puts on bearer tokens.
pub const TEST_BEARER_ISSUER: &str = "test-bearer-issuer";

/// Issuer the mock backend puts on refresh tokens.
pub const TEST_REFRESH_ISSUER: &str = "test-refresh-issuer";

pub const BEARER_KEY_PATH: &str = "/api/v1/auth/token/bearer/public-key";
pub const REFRESH_KEY_PATH: &str = "/api/v1/auth/token/refresh/public-key";
pub const REFRESH_GRANT_PATH: &str = "/api/v1/auth/token/grant-type/refresh-token";

/// Test harness standing in for the auth backend.
///
/// # Example
/// ```rust,ignore
/// let backend = MockAuthBackend::start().await;
/// backend
///     .respond_to_refresh_with(
///         &backend.bearer_token("alice", "user", 3600),
///         &backend.refresh_token("alice"),
///     )
///     .await;
///
/// let config = Config::new(backend.uri(), TEST_BEARER_ISSUER, TEST_REFRESH_ISSUER);
/// ```
pub struct MockAuthBackend {
    server: MockServer,
    bearer_signer: TestSigningKey,
    refresh_signer: TestSigningKey,
}

impl MockAuthBackend {
    /// Start a backend serving both public keys.
    pub async fn start() -> Self {
        let backend = Self::start_without_keys().await;
        backend.serve_key(BEARER_KEY_PATH, backend.bearer_signer.public_key_pem()).await;
        backend.serve_key(REFRESH_KEY_PATH, backend.refresh_signer.public_key_pem()).await;
        backend
    }

    /// Start a backend with no routes mounted; unmatched requests get 404.
    pub async fn start_without_keys() -> Self {
        Self {
            server: MockServer::start().await,
            bearer_signer: TestSigningKey::from_seed(101),
            refresh_signer: TestSigningKey::from_seed(102),
        }
    }

    /// Base URL of the backend.
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn bearer_signer(&self) -> &TestSigningKey {
        &self.bearer_signer
    }

    pub fn refresh_signer(&self) -> &TestSigningKey {
        &self.refresh_signer
    }

    /// Serve `pem` at `key_path`.
    pub async fn serve_key(&self, key_path: &str, pem: &str) {
        Mock::given(method("GET"))
            .and(path(key_path))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "publicKey": pem }
            })))
            .mount(&self.server)
            .await;
    }

    /// Fail `key_path` with `status`.
    pub async fn fail_key(&self, key_path: &str, status: u16) {
        Mock::given(method("GET"))
            .and(path(key_path))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Bearer token signed with the backend's bearer key.
    pub fn bearer_token(&self, sub: &str, role: &str, expires_in: i64) -> String {
        self.bearer_signer
            .sign(
                &TestTokenBuilder::new()
                    .for_user(sub)
                    .with_role(role)
                    .issued_by(TEST_BEARER_ISSUER)
                    .expires_in(expires_in)
                    .build(),
            )
            .expect("bearer token should sign")
    }

    /// Refresh token signed with the backend's refresh key, valid 30 days.
    pub fn refresh_token(&self, sub: &str) -> String {
        self.refresh_signer
            .sign(
                &TestTokenBuilder::new()
                    .for_user(sub)
                    .issued_by(TEST_REFRESH_ISSUER)
                    .expires_in(30 * 86_400)
                    .build(),
            )
            .expect("refresh token should sign")
    }

    /// Answer every refresh exchange with the given pair.
    pub async fn respond_to_refresh_with(&self, access_token: &str, new_refresh_token: &str) {
        self.respond_to_refresh(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "accessToken": access_token,
                "newRefreshToken": new_refresh_token,
                "tokenType": "bearer",
            }
        })))
        .await;
    }

    /// Answer every refresh exchange with `template`.
    pub async fn respond_to_refresh(&self, template: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path(REFRESH_GRANT_PATH))
            .respond_with(template)
            .mount(&self.server)
            .await;
    }

    /// Fail the next refresh exchange with `status`; later ones fall through
    /// to whatever else is mounted.
    pub async fn fail_refresh_once(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path(REFRESH_GRANT_PATH))
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(1)
            .mount(&self.server)
            .await;
    }

    /// Reject every refresh exchange with `status`.
    pub async fn reject_refresh(&self, status: u16) {
        self.respond_to_refresh(ResponseTemplate::new(status).set_body_json(json!({
            "error": { "code": "INVALID_TOKEN", "message": "refresh token rejected" }
        })))
        .await;
    }

    /// Drop all mounted routes and recorded requests.
    pub async fn reset(&self) {
        self.server.reset().await;
    }

    /// JSON bodies of the refresh exchanges received so far.
    pub async fn refresh_requests(&self) -> Vec<Value> {
        self.requests_to(REFRESH_GRANT_PATH)
            .await
            .into_iter()
            .map(|request| request.body_json::<Value>().expect("refresh body should be JSON"))
            .collect()
    }

    /// Number of requests received for `key_path`.
    pub async fn key_requests(&self, key_path: &str) -> usize {
        self.requests_to(key_path).await.len()
    }

    async fn requests_to(&self, request_path: &str) -> Vec<wiremock::Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|request| request.url.path() == request_path)
            .collect()
    }
}
