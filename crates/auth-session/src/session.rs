//! The session façade.
//!
//! An [`AuthSession`] is owned by the embedding application and passed to
//! whatever needs to know who is logged in. It never caches an
//! "authorized" flag: [`AuthSession::is_authorized`] re-verifies the current
//! bearer token against the cached bearer key on every call.

use crate::claims::{self, Claims};
use crate::client::{AuthApi, HttpAuthClient};
use crate::config::Config;
use crate::coordinator::{RefreshCoordinator, RefreshOutcome, RefreshState};
use crate::errors::AuthError;
use crate::keys::{KeyCache, TokenPurpose};
use crate::store::{InMemoryRefreshTokenStore, RefreshTokenStore};
use crate::verifier::verify;
use common::secret::{ExposeSecret, SecretString};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::instrument;

/// A user's bearer/refresh token session.
pub struct AuthSession {
    keys: Arc<KeyCache>,
    coordinator: RefreshCoordinator,
}

impl AuthSession {
    /// Empty session with a process-local refresh token store.
    pub fn new(config: &Config, api: Arc<dyn AuthApi>) -> Self {
        Self::with_store(config, api, Arc::new(InMemoryRefreshTokenStore::default()))
    }

    /// Session bootstrapped from the refresh token persisted in `store`.
    pub fn with_store(
        config: &Config,
        api: Arc<dyn AuthApi>,
        store: Arc<dyn RefreshTokenStore>,
    ) -> Self {
        let keys = Arc::new(KeyCache::new(
            Arc::clone(&api),
            config.bearer.clone(),
            config.refresh.clone(),
        ));
        let coordinator = RefreshCoordinator::new(
            api,
            Arc::clone(&keys),
            store,
            config.refresh_policy.clone(),
            config.refresh_token_ttl,
        );

        Self { keys, coordinator }
    }

    /// Session talking to the backend at `config.api_base_url` over HTTP.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the HTTP client cannot be built.
    pub fn connect(config: &Config, store: Arc<dyn RefreshTokenStore>) -> Result<Self, AuthError> {
        let api = HttpAuthClient::new(config.api_base_url.clone(), config.http_timeout)?;
        Ok(Self::with_store(config, Arc::new(api), store))
    }

    /// Adopt an existing token pair, e.g. one handed over after login.
    ///
    /// Nothing is verified here; call [`Self::check_expiration`] before
    /// relying on the session.
    pub fn restore(&self, bearer: SecretString, refresh: Option<SecretString>) {
        self.coordinator.bootstrap(Some(bearer), refresh);
    }

    /// Claims of the current bearer token, verified against the cached key.
    ///
    /// `Ok(None)` when there is no bearer token.
    ///
    /// # Errors
    ///
    /// `KeyMissing` if the bearer key has not been fetched, otherwise any
    /// verification error.
    pub fn verified_claims(&self) -> Result<Option<Claims>, AuthError> {
        let Some(bearer) = self.coordinator.bearer() else {
            return Ok(None);
        };
        let key = self.keys.cached(TokenPurpose::Bearer);
        verify(bearer.expose_secret(), TokenPurpose::Bearer, key.as_deref()).map(Some)
    }

    /// Whether the current bearer token verifies right now.
    #[must_use]
    pub fn is_authorized(&self) -> bool {
        match self.verified_claims() {
            Ok(claims) => claims.is_some(),
            Err(e) => {
                tracing::debug!(target: "auth.session", error = %e, "Session not authorized");
                false
            }
        }
    }

    /// Subject of the current bearer token. Not verified.
    #[must_use]
    pub fn subject(&self) -> Option<String> {
        self.decoded_claims().map(|claims| claims.sub)
    }

    /// Role of the current bearer token. Not verified; check
    /// [`Self::is_authorized`] before trusting it.
    #[must_use]
    pub fn role(&self) -> Option<String> {
        self.decoded_claims().and_then(|claims| claims.role)
    }

    fn decoded_claims(&self) -> Option<Claims> {
        let bearer = self.coordinator.bearer()?;
        claims::decode(bearer.expose_secret()).ok()
    }

    /// Refresh the tokens if the bearer token is missing, close to expiry, or
    /// fails verification.
    #[instrument(skip_all)]
    pub async fn check_expiration(&self) -> RefreshOutcome {
        let outcome = self.coordinator.check_expiration().await;
        tracing::debug!(target: "auth.session", ?outcome, "Expiration check finished");
        outcome
    }

    /// End the session, including the persisted refresh token.
    #[instrument(skip_all)]
    pub async fn logout(&self) {
        self.coordinator.clear().await;
    }

    /// Fetch both verification keys ahead of the first check.
    ///
    /// # Errors
    ///
    /// Returns the first key fetch error.
    pub async fn prefetch_keys(&self) -> Result<(), AuthError> {
        self.keys.ensure_all().await
    }

    #[must_use]
    pub fn state(&self) -> RefreshState {
        self.coordinator.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RefreshState> {
        self.coordinator.subscribe_state()
    }
}
