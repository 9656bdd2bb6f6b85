//! Per-purpose public key cache.
//!
//! Bearer and refresh tokens are signed with different keys. Each purpose
//! gets one cache slot, filled by fetching the PEM public key from the
//! backend the first time it is needed.
//!
//! Keys have no TTL. A slot is emptied only by [`KeyCache::invalidate`],
//! which the refresh coordinator calls when a freshly issued token fails
//! its signature check (the backend probably rotated the key).
//!
//! Concurrent `get_key` calls for an empty slot share one fetch: each
//! purpose has an async gate, and callers re-check the slot after
//! acquiring it.

use crate::client::AuthApi;
use crate::config::TokenRules;
use crate::errors::AuthError;
use crate::verifier::decoding_key_from_pem;
use jsonwebtoken::{Algorithm, DecodingKey};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::instrument;

/// What a token is used for. Each purpose has its own key and rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenPurpose {
    /// Short-lived token authorizing API requests.
    Bearer,
    /// Long-lived token authorizing renewal.
    Refresh,
}

impl TokenPurpose {
    /// Lowercase name used in endpoint paths and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bearer => "bearer",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A purpose's public key plus the algorithm and issuer tokens must match.
#[derive(Clone)]
pub struct VerificationKey {
    purpose: TokenPurpose,
    rules: TokenRules,
    decoding_key: DecodingKey,
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("purpose", &self.purpose)
            .field("algorithm", &self.rules.algorithm)
            .field("issuer", &self.rules.issuer)
            .finish_non_exhaustive()
    }
}

impl VerificationKey {
    /// Parse PEM key material for `purpose` under `rules`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidKey` if the PEM does not match the
    /// algorithm's key family.
    pub fn from_pem(
        purpose: TokenPurpose,
        public_key_pem: &str,
        rules: &TokenRules,
    ) -> Result<Self, AuthError> {
        let decoding_key = decoding_key_from_pem(public_key_pem, rules.algorithm)?;
        Ok(Self {
            purpose,
            rules: rules.clone(),
            decoding_key,
        })
    }

    #[must_use]
    pub fn purpose(&self) -> TokenPurpose {
        self.purpose
    }

    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.rules.algorithm
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.rules.issuer
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

/// One purpose's cached key and its fetch gate.
struct KeySlot {
    rules: TokenRules,
    key: watch::Sender<Option<Arc<VerificationKey>>>,
    fetch_gate: Mutex<()>,
}

impl KeySlot {
    fn new(rules: TokenRules) -> Self {
        let (key, _) = watch::channel(None);
        Self {
            rules,
            key,
            fetch_gate: Mutex::new(()),
        }
    }
}

/// Cache of verification keys, one slot per [`TokenPurpose`].
pub struct KeyCache {
    api: Arc<dyn AuthApi>,
    bearer: KeySlot,
    refresh: KeySlot,
}

impl KeyCache {
    /// Create an empty cache fetching through `api`.
    pub fn new(api: Arc<dyn AuthApi>, bearer: TokenRules, refresh: TokenRules) -> Self {
        Self {
            api,
            bearer: KeySlot::new(bearer),
            refresh: KeySlot::new(refresh),
        }
    }

    fn slot(&self, purpose: TokenPurpose) -> &KeySlot {
        match purpose {
            TokenPurpose::Bearer => &self.bearer,
            TokenPurpose::Refresh => &self.refresh,
        }
    }

    /// The cached key for `purpose`, without fetching.
    #[must_use]
    pub fn cached(&self, purpose: TokenPurpose) -> Option<Arc<VerificationKey>> {
        self.slot(purpose).key.borrow().clone()
    }

    /// Return the cached key, fetching it first if the slot is empty.
    ///
    /// At most one fetch per purpose is outstanding; concurrent callers wait
    /// for it and then read the filled slot.
    ///
    /// # Errors
    ///
    /// - `KeyFetch` - the backend could not be reached or answered badly
    /// - `InvalidKey` - the fetched PEM does not fit the configured algorithm
    ///
    /// Either way the slot stays empty.
    #[instrument(skip(self), fields(purpose = %purpose))]
    pub async fn get_key(&self, purpose: TokenPurpose) -> Result<Arc<VerificationKey>, AuthError> {
        if let Some(key) = self.cached(purpose) {
            tracing::trace!(target: "auth.keys", "Key cache hit");
            return Ok(key);
        }

        let slot = self.slot(purpose);
        let _gate = slot.fetch_gate.lock().await;

        // Another caller may have filled the slot while we waited
        if let Some(key) = self.cached(purpose) {
            tracing::debug!(target: "auth.keys", "Key fetched by concurrent caller");
            return Ok(key);
        }

        tracing::debug!(target: "auth.keys", "Key cache miss, fetching");

        let pem = self.api.fetch_public_key(purpose).await.map_err(|e| {
            tracing::warn!(target: "auth.keys", error = %e, "Public key fetch failed");
            e
        })?;

        let key = Arc::new(VerificationKey::from_pem(purpose, &pem, &slot.rules).map_err(
            |e| {
                tracing::warn!(target: "auth.keys", error = %e, "Fetched public key is unusable");
                e
            },
        )?);

        slot.key.send_replace(Some(Arc::clone(&key)));
        tracing::info!(target: "auth.keys", algorithm = ?key.algorithm(), "Public key cached");

        Ok(key)
    }

    /// Fetch any missing keys for both purposes.
    ///
    /// # Errors
    ///
    /// Returns the first fetch error; the other purpose is still attempted.
    pub async fn ensure_all(&self) -> Result<(), AuthError> {
        let (bearer, refresh) = tokio::join!(
            self.get_key(TokenPurpose::Bearer),
            self.get_key(TokenPurpose::Refresh)
        );
        bearer?;
        refresh?;
        Ok(())
    }

    /// Drop the cached key for `purpose`; the next `get_key` re-fetches.
    pub fn invalidate(&self, purpose: TokenPurpose) {
        let previous = self.slot(purpose).key.send_replace(None);
        if previous.is_some() {
            tracing::info!(target: "auth.keys", %purpose, "Cached public key invalidated");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::client::mock::MockAuthApi;
    use auth_test_utils::crypto_fixtures::TestSigningKey;

    fn cache_with(api: Arc<MockAuthApi>) -> KeyCache {
        KeyCache::new(
            api,
            TokenRules::new("auth-bearer"),
            TokenRules::new("auth-refresh"),
        )
    }

    fn keys() -> (TestSigningKey, TestSigningKey) {
        (TestSigningKey::from_seed(1), TestSigningKey::from_seed(2))
    }

    #[test]
    fn test_purpose_names() {
        assert_eq!(TokenPurpose::Bearer.to_string(), "bearer");
        assert_eq!(TokenPurpose::Refresh.as_str(), "refresh");
    }

    #[tokio::test]
    async fn test_get_key_fetches_once_then_hits_cache() {
        let (bearer, refresh) = keys();
        let api = Arc::new(MockAuthApi::new(
            bearer.public_key_pem(),
            refresh.public_key_pem(),
        ));
        let cache = cache_with(api.clone());

        assert!(cache.cached(TokenPurpose::Bearer).is_none());

        let first = cache.get_key(TokenPurpose::Bearer).await.unwrap();
        let second = cache.get_key(TokenPurpose::Bearer).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.issuer(), "auth-bearer");
        assert_eq!(first.purpose(), TokenPurpose::Bearer);
        assert_eq!(api.key_calls(TokenPurpose::Bearer), 1);
        assert_eq!(api.key_calls(TokenPurpose::Refresh), 0);
    }

    #[tokio::test]
    async fn test_concurrent_get_key_single_fetch() {
        let (bearer, refresh) = keys();
        let api = Arc::new(MockAuthApi::new(
            bearer.public_key_pem(),
            refresh.public_key_pem(),
        ));
        let cache = cache_with(api.clone());

        let results = futures::future::join_all(
            (0..8).map(|_| cache.get_key(TokenPurpose::Refresh)),
        )
        .await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(api.key_calls(TokenPurpose::Refresh), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_slot_empty() {
        let (bearer, refresh) = keys();
        let api = Arc::new(
            MockAuthApi::new(bearer.public_key_pem(), refresh.public_key_pem())
                .with_key_failure(TokenPurpose::Bearer),
        );
        let cache = cache_with(api.clone());

        let err = cache.get_key(TokenPurpose::Bearer).await.unwrap_err();
        assert!(matches!(err, AuthError::KeyFetch { purpose: TokenPurpose::Bearer, .. }));
        assert!(cache.cached(TokenPurpose::Bearer).is_none());

        // A later call tries again
        let _ = cache.get_key(TokenPurpose::Bearer).await;
        assert_eq!(api.key_calls(TokenPurpose::Bearer), 2);
    }

    #[tokio::test]
    async fn test_unusable_pem_is_not_cached() {
        let api = Arc::new(MockAuthApi::new("not a pem", "not a pem either"));
        let cache = cache_with(api);

        assert!(matches!(
            cache.get_key(TokenPurpose::Bearer).await,
            Err(AuthError::InvalidKey(_))
        ));
        assert!(cache.cached(TokenPurpose::Bearer).is_none());
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let (bearer, refresh) = keys();
        let api = Arc::new(MockAuthApi::new(
            bearer.public_key_pem(),
            refresh.public_key_pem(),
        ));
        let cache = cache_with(api.clone());

        cache.get_key(TokenPurpose::Bearer).await.unwrap();
        cache.invalidate(TokenPurpose::Bearer);
        assert!(cache.cached(TokenPurpose::Bearer).is_none());

        cache.get_key(TokenPurpose::Bearer).await.unwrap();
        assert_eq!(api.key_calls(TokenPurpose::Bearer), 2);
    }

    #[tokio::test]
    async fn test_ensure_all_fetches_both() {
        let (bearer, refresh) = keys();
        let api = Arc::new(MockAuthApi::new(
            bearer.public_key_pem(),
            refresh.public_key_pem(),
        ));
        let cache = cache_with(api.clone());

        cache.ensure_all().await.unwrap();

        assert!(cache.cached(TokenPurpose::Bearer).is_some());
        assert!(cache.cached(TokenPurpose::Refresh).is_some());
    }

    #[tokio::test]
    async fn test_ensure_all_reports_failure_but_fills_other() {
        let (bearer, refresh) = keys();
        let api = Arc::new(
            MockAuthApi::new(bearer.public_key_pem(), refresh.public_key_pem())
                .with_key_failure(TokenPurpose::Refresh),
        );
        let cache = cache_with(api);

        assert!(cache.ensure_all().await.is_err());
        assert!(cache.cached(TokenPurpose::Bearer).is_some());
        assert!(cache.cached(TokenPurpose::Refresh).is_none());
    }
}
