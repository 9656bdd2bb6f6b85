//! Persisted refresh token contract.
//!
//! The session persists exactly one value: the current refresh token, with
//! an expiry window (30 days by default). It is
//! - read once when a session is bootstrapped,
//! - written when a refresh exchange commits a new pair,
//! - removed when the backend rejects it, a returned token fails
//!   verification, or the user logs out.
//!
//! Transport failures leave the persisted value alone so a later session can
//! try again. Where the value actually lives (cookie, keychain, file) is up
//! to the embedding application; [`InMemoryRefreshTokenStore`] backs tests
//! and the probe binary.

use chrono::{DateTime, Utc};
use common::secret::{non_empty, SecretString};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Storage for the long-lived refresh token.
pub trait RefreshTokenStore: Send + Sync {
    /// The persisted refresh token, if present and not past its window.
    fn load(&self) -> Option<SecretString>;

    /// Persist `token`, readable for `ttl`.
    fn save(&self, token: &SecretString, ttl: Duration);

    /// Remove the persisted token.
    fn clear(&self);
}

#[derive(Debug, Clone)]
struct StoredToken {
    token: SecretString,
    /// `None` when the window overflows the calendar.
    expires_at: Option<DateTime<Utc>>,
}

/// Process-local [`RefreshTokenStore`].
#[derive(Debug, Default)]
pub struct InMemoryRefreshTokenStore {
    entry: Mutex<Option<StoredToken>>,
}

impl InMemoryRefreshTokenStore {
    /// Store pre-seeded with `token` (e.g. read from the environment).
    #[must_use]
    pub fn with_token(token: SecretString, ttl: Duration) -> Self {
        let store = Self::default();
        store.save(&token, ttl);
        store
    }

    /// When the persisted token stops being readable.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.lock().as_ref().and_then(|entry| entry.expires_at)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<StoredToken>> {
        // The guarded value is replaced wholesale, so a poisoned lock still
        // holds a consistent entry
        self.entry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RefreshTokenStore for InMemoryRefreshTokenStore {
    fn load(&self) -> Option<SecretString> {
        let mut entry = self.lock();
        let expired = entry
            .as_ref()
            .and_then(|stored| stored.expires_at)
            .is_some_and(|expires_at| Utc::now() >= expires_at);

        if expired {
            tracing::debug!(target: "auth.store", "Persisted refresh token past its window");
            *entry = None;
        }

        non_empty(entry.as_ref().map(|stored| stored.token.clone()))
    }

    fn save(&self, token: &SecretString, ttl: Duration) {
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|window| now.checked_add_signed(window));

        *self.lock() = Some(StoredToken {
            token: token.clone(),
            expires_at,
        });
    }

    fn clear(&self) {
        *self.lock() = None;
    }
}
