//! HTTP collaborator for the auth backend.
//!
//! [`AuthApi`] is the seam the key cache and refresh coordinator talk
//! through; [`HttpAuthClient`] is the production implementation.
//!
//! # Security
//!
//! - No `Authorization` header is sent: the key endpoints are public and the
//!   refresh exchange authenticates with the refresh token in the body
//! - Tokens are deserialized straight into `SecretString`
//! - Response bodies of rejected requests are logged at trace level only
//! - HTTP timeouts prevent hanging connections

use crate::errors::AuthError;
use crate::keys::TokenPurpose;
use common::secret::{ExposeSecret, SecretString};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

/// Default connection timeout for HTTP client.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Only exchange responses with this token type are accepted.
pub const BEARER_TOKEN_TYPE: &str = "bearer";

/// Path of the refresh exchange endpoint.
pub const REFRESH_GRANT_PATH: &str = "api/v1/auth/token/grant-type/refresh-token";

/// Path of the public key endpoint for `purpose`.
#[must_use]
pub fn public_key_path(purpose: TokenPurpose) -> String {
    format!("api/v1/auth/token/{}/public-key", purpose.as_str())
}

/// A candidate token pair returned by the refresh exchange. Unverified.
#[derive(Debug, Clone)]
pub struct TokenPair {
    /// New bearer token.
    pub access_token: SecretString,
    /// Replacement refresh token.
    pub new_refresh_token: SecretString,
}

/// Backend operations the session needs.
#[async_trait::async_trait]
pub trait AuthApi: Send + Sync {
    /// Fetch the PEM public key currently used to sign `purpose` tokens.
    async fn fetch_public_key(&self, purpose: TokenPurpose) -> Result<String, AuthError>;

    /// Trade a refresh token for a new bearer/refresh pair.
    async fn exchange_refresh_token(
        &self,
        refresh_token: &SecretString,
    ) -> Result<TokenPair, AuthError>;
}

// =============================================================================
// Wire Types
// =============================================================================

/// `{ "data": ... }` envelope used by every endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicKeyData {
    public_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshGrantRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshGrantData {
    access_token: SecretString,
    #[serde(alias = "refreshToken")]
    new_refresh_token: SecretString,
    token_type: String,
}

// =============================================================================
// HTTP Client
// =============================================================================

/// `reqwest`-backed [`AuthApi`].
#[derive(Debug, Clone)]
pub struct HttpAuthClient {
    /// HTTP client with configured timeouts.
    client: Client,

    /// Backend base URL without trailing slash.
    base_url: String,
}

impl HttpAuthClient {
    /// Create a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

#[async_trait::async_trait]
impl AuthApi for HttpAuthClient {
    #[instrument(skip(self), fields(purpose = %purpose))]
    async fn fetch_public_key(&self, purpose: TokenPurpose) -> Result<String, AuthError> {
        let url = self.url(&public_key_path(purpose));
        let fetch_error = |reason: String| AuthError::KeyFetch { purpose, reason };

        debug!(target: "auth.client", url = %url, "Fetching public key");

        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!(target: "auth.client", error = %e, "Public key request failed");
            fetch_error(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(target: "auth.client", status = %status, "Public key endpoint returned error");
            return Err(fetch_error(format!("Status {status}")));
        }

        let body: Envelope<PublicKeyData> = response.json().await.map_err(|e| {
            warn!(target: "auth.client", error = %e, "Failed to parse public key response");
            fetch_error(format!("invalid response: {e}"))
        })?;

        if body.data.public_key.trim().is_empty() {
            return Err(fetch_error("empty public key".to_string()));
        }

        Ok(body.data.public_key)
    }

    #[instrument(skip_all)]
    async fn exchange_refresh_token(
        &self,
        refresh_token: &SecretString,
    ) -> Result<TokenPair, AuthError> {
        let url = self.url(REFRESH_GRANT_PATH);

        debug!(target: "auth.client", url = %url, "Requesting token refresh");

        let response = self
            .client
            .post(&url)
            .json(&RefreshGrantRequest {
                refresh_token: refresh_token.expose_secret(),
            })
            .send()
            .await
            .map_err(|e| {
                debug!(target: "auth.client", error = %e, "HTTP request failed");
                AuthError::RefreshExchange(e.to_string())
            })?;

        let status = response.status();

        if status.is_success() {
            let body: Envelope<RefreshGrantData> = response.json().await.map_err(|e| {
                warn!(target: "auth.client", error = %e, "Failed to parse refresh response");
                AuthError::RefreshRejected(format!("invalid response: {e}"))
            })?;

            let data = body.data;
            if data.token_type != BEARER_TOKEN_TYPE {
                warn!(
                    target: "auth.client",
                    token_type = %data.token_type,
                    "Refresh response carried unexpected token type"
                );
                return Err(AuthError::RefreshRejected(format!(
                    "unexpected token type '{}'",
                    data.token_type
                )));
            }

            debug!(target: "auth.client", "Refresh exchange returned token pair");

            Ok(TokenPair {
                access_token: data.access_token,
                new_refresh_token: data.new_refresh_token,
            })
        } else if status.is_client_error() {
            // Body may echo request details, keep it out of normal logs
            let body = response.text().await.unwrap_or_else(|e| {
                trace!(target: "auth.client", error = %e, "Failed to read error response body");
                "<failed to read body>".to_string()
            });
            warn!(target: "auth.client", status = %status, "Refresh exchange rejected");
            trace!(target: "auth.client", body = %body, "Refresh rejection response body");
            Err(AuthError::RefreshRejected(format!("Status {status}")))
        } else {
            warn!(target: "auth.client", status = %status, "Refresh exchange failed");
            Err(AuthError::RefreshExchange(format!("Status {status}")))
        }
    }
}

// =============================================================================
// Mock
// =============================================================================
