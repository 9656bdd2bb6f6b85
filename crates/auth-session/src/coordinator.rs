//! Refresh coordinator.
//!
//! Owns the session's bearer/refresh token pair and is the only writer of
//! it. Every [`RefreshCoordinator::check_expiration`] call walks the state
//! machine:
//!
//! ```text
//! Idle -> CheckingExpiration -> Idle                    (token fresh and verifies)
//!                            -> Refreshing -> Committed -> Idle
//!                                          -> Failed    (tokens cleared)
//! ```
//!
//! A refresh fetches both public keys, exchanges the refresh token (or the
//! `"none"` sentinel when there is none) and verifies both returned tokens
//! before anything is written. The new pair replaces the old one in a single
//! write; on any failure both tokens are cleared instead.
//!
//! At most one check runs per coordinator. Callers arriving while one is in
//! flight wait for its outcome instead of starting a second exchange.

use crate::claims;
use crate::client::{AuthApi, TokenPair};
use crate::config::{
    DEFAULT_BACKOFF_BASE, DEFAULT_MAX_RETRIES, DEFAULT_REFRESH_THRESHOLD, DEFAULT_REFRESH_TIMEOUT,
};
use crate::errors::AuthError;
use crate::keys::{KeyCache, TokenPurpose};
use crate::store::RefreshTokenStore;
use crate::verifier::verify;
use common::secret::{non_empty, ExposeSecret, SecretString};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Sent in place of a refresh token when the session has none.
pub const NO_REFRESH_TOKEN_SENTINEL: &str = "none";

/// Maximum delay between refresh exchange attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// When to refresh and how hard to try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Refresh once the bearer token expires within this window.
    pub threshold: Duration,
    /// Retries after the first exchange attempt (transport failures only).
    pub max_retries: u32,
    /// Delay before the first retry; doubles per attempt, capped at 30s.
    pub backoff_base: Duration,
    /// Upper bound on a single exchange attempt.
    pub refresh_timeout: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_REFRESH_THRESHOLD,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }
}

impl RefreshPolicy {
    /// Delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2_u32.saturating_pow(attempt))
            .min(MAX_BACKOFF)
    }
}

/// Coordinator state, observable through [`RefreshCoordinator::subscribe_state`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefreshState {
    #[default]
    Idle,
    CheckingExpiration,
    Refreshing,
    Committed,
    /// Last check failed and cleared the session. Rests here until the next check.
    Failed,
}

/// Result of one expiration check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The bearer token is outside the refresh window; nothing happened.
    Unchanged,
    /// A new verified token pair was committed.
    Refreshed,
    /// The refresh failed and the session was cleared.
    Failed(AuthError),
}

/// The session's current token pair.
#[derive(Debug, Clone, Default)]
pub struct SessionTokens {
    pub bearer: Option<SecretString>,
    pub refresh: Option<SecretString>,
}

type OutcomeReceiver = watch::Receiver<Option<RefreshOutcome>>;

/// Clears the in-flight marker when the leading check finishes or is dropped.
struct InFlightGuard<'a> {
    coordinator: &'a RefreshCoordinator,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        *self.coordinator.in_flight() = None;
        // A leader dropped mid-check never reached a terminal state
        self.coordinator.state.send_if_modified(|state| {
            let busy = matches!(
                state,
                RefreshState::CheckingExpiration | RefreshState::Refreshing
            );
            if busy {
                *state = RefreshState::Idle;
            }
            busy
        });
    }
}

enum Turn<'a> {
    Lead(watch::Sender<Option<RefreshOutcome>>, InFlightGuard<'a>),
    Join(OutcomeReceiver),
}

/// Single-flight refresh state machine over the session's tokens.
pub struct RefreshCoordinator {
    api: Arc<dyn AuthApi>,
    keys: Arc<KeyCache>,
    store: Arc<dyn RefreshTokenStore>,
    policy: RefreshPolicy,
    refresh_token_ttl: Duration,
    tokens: watch::Sender<SessionTokens>,
    state: watch::Sender<RefreshState>,
    in_flight: Mutex<Option<OutcomeReceiver>>,
}

impl RefreshCoordinator {
    pub fn new(
        api: Arc<dyn AuthApi>,
        keys: Arc<KeyCache>,
        store: Arc<dyn RefreshTokenStore>,
        policy: RefreshPolicy,
        refresh_token_ttl: Duration,
    ) -> Self {
        // The persisted refresh token is read once, here
        let (tokens, _) = watch::channel(SessionTokens {
            bearer: None,
            refresh: store.load(),
        });
        let (state, _) = watch::channel(RefreshState::Idle);
        Self {
            api,
            keys,
            store,
            policy,
            refresh_token_ttl,
            tokens,
            state,
            in_flight: Mutex::new(None),
        }
    }

    /// Snapshot of the current token pair.
    #[must_use]
    pub fn tokens(&self) -> SessionTokens {
        self.tokens.borrow().clone()
    }

    /// Current bearer token, if any.
    #[must_use]
    pub fn bearer(&self) -> Option<SecretString> {
        self.tokens.borrow().bearer.clone()
    }

    #[must_use]
    pub fn state(&self) -> RefreshState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RefreshState> {
        self.state.subscribe()
    }

    /// Seed the session with an existing pair, e.g. restored at startup.
    ///
    /// The refresh token is persisted. Blank values count as absent.
    pub fn bootstrap(&self, bearer: Option<SecretString>, refresh: Option<SecretString>) {
        let tokens = SessionTokens {
            bearer: non_empty(bearer),
            refresh: non_empty(refresh),
        };
        if let Some(refresh) = &tokens.refresh {
            self.store.save(refresh, self.refresh_token_ttl);
        }
        debug!(
            target: "auth.coordinator",
            has_bearer = tokens.bearer.is_some(),
            has_refresh = tokens.refresh.is_some(),
            "Session bootstrapped"
        );
        self.tokens.send_replace(tokens);
    }

    /// Refresh the session if its bearer token is missing, about to expire, or
    /// fails verification.
    ///
    /// Joins the check already in flight, if there is one.
    #[instrument(skip_all)]
    pub async fn check_expiration(&self) -> RefreshOutcome {
        match self.take_turn() {
            Turn::Lead(outcome_tx, guard) => {
                let outcome = self.run_check().await;
                drop(guard);
                outcome_tx.send_replace(Some(outcome.clone()));
                outcome
            }
            Turn::Join(outcome_rx) => {
                debug!(target: "auth.coordinator", "Joining in-flight expiration check");
                wait_for_outcome(outcome_rx).await
            }
        }
    }

    /// Wait for any in-flight check, then clear both tokens and the persisted
    /// refresh token.
    #[instrument(skip_all)]
    pub async fn clear(&self) {
        let pending = self.in_flight().clone();
        if let Some(outcome_rx) = pending {
            let _ = wait_for_outcome(outcome_rx).await;
        }

        self.tokens.send_replace(SessionTokens::default());
        self.store.clear();
        self.state.send_replace(RefreshState::Idle);
        info!(target: "auth.coordinator", "Session cleared");
    }

    fn in_flight(&self) -> MutexGuard<'_, Option<OutcomeReceiver>> {
        // Only ever holds an Option that is swapped wholesale
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_turn(&self) -> Turn<'_> {
        let mut in_flight = self.in_flight();
        if let Some(outcome_rx) = in_flight.as_ref() {
            return Turn::Join(outcome_rx.clone());
        }

        let (outcome_tx, outcome_rx) = watch::channel(None);
        *in_flight = Some(outcome_rx);
        Turn::Lead(outcome_tx, InFlightGuard { coordinator: self })
    }

    async fn run_check(&self) -> RefreshOutcome {
        self.state.send_replace(RefreshState::CheckingExpiration);

        if !self.needs_refresh(chrono::Utc::now().timestamp()) && !self.bearer_rejected().await {
            self.state.send_replace(RefreshState::Idle);
            return RefreshOutcome::Unchanged;
        }

        self.state.send_replace(RefreshState::Refreshing);

        match self.refresh().await {
            Ok(pair) => {
                self.commit(pair);
                RefreshOutcome::Refreshed
            }
            Err(e) => {
                self.fail(&e);
                RefreshOutcome::Failed(e)
            }
        }
    }

    /// Whether the current bearer token calls for a refresh at `now`.
    ///
    /// A missing or undecodable bearer token always does.
    fn needs_refresh(&self, now: i64) -> bool {
        let Some(bearer) = self.bearer() else {
            debug!(target: "auth.coordinator", "No bearer token, refresh required");
            return true;
        };

        match claims::decode(bearer.expose_secret()) {
            Ok(claims) => {
                let due = claims.expires_within(self.policy.threshold, now);
                debug!(
                    target: "auth.coordinator",
                    expires_in_secs = claims.seconds_until_expiry(now),
                    due,
                    "Checked bearer token expiry"
                );
                due
            }
            Err(_) => {
                debug!(target: "auth.coordinator", "Bearer token undecodable, refresh required");
                true
            }
        }
    }

    /// Whether the current, not yet due, bearer token fails verification.
    ///
    /// Only a verdict on the token itself counts. When the bearer key cannot
    /// be had the token is kept and stays unauthorized until a later check.
    async fn bearer_rejected(&self) -> bool {
        let key = match self.keys.get_key(TokenPurpose::Bearer).await {
            Ok(key) => key,
            Err(e) => {
                warn!(target: "auth.coordinator", error = %e, "Bearer key unavailable");
                return false;
            }
        };
        let Some(bearer) = self.bearer() else {
            return false;
        };

        match verify(bearer.expose_secret(), TokenPurpose::Bearer, Some(key.as_ref())) {
            Ok(_) => false,
            Err(
                e @ (AuthError::SignatureInvalid
                | AuthError::IssuerMismatch
                | AuthError::MalformedToken
                | AuthError::TokenExpired),
            ) => {
                warn!(
                    target: "auth.coordinator",
                    error = %e,
                    "Current bearer token failed verification, refresh required"
                );
                if e == AuthError::SignatureInvalid {
                    self.keys.invalidate(TokenPurpose::Bearer);
                }
                true
            }
            Err(e) => {
                warn!(target: "auth.coordinator", error = %e, "Bearer token not verifiable");
                false
            }
        }
    }

    async fn refresh(&self) -> Result<TokenPair, AuthError> {
        let (bearer_key, refresh_key) = tokio::join!(
            self.keys.get_key(TokenPurpose::Bearer),
            self.keys.get_key(TokenPurpose::Refresh)
        );
        let bearer_key = bearer_key?;
        let refresh_key = refresh_key?;

        let current = self.tokens.borrow().refresh.clone();
        let (refresh_token, sentinel) = match current.or_else(|| self.store.load()) {
            Some(token) => (token, false),
            None => {
                debug!(target: "auth.coordinator", "No refresh token, sending sentinel");
                (SecretString::from(NO_REFRESH_TOKEN_SENTINEL), true)
            }
        };

        let pair = self
            .exchange_with_retry(&refresh_token)
            .await
            .map_err(|e| match e {
                AuthError::RefreshRejected(_) if sentinel => AuthError::MissingRefreshToken,
                other => other,
            })?;

        // Check both before failing so each problem is logged
        let access = verify(
            pair.access_token.expose_secret(),
            TokenPurpose::Bearer,
            Some(bearer_key.as_ref()),
        );
        let renewed = verify(
            pair.new_refresh_token.expose_secret(),
            TokenPurpose::Refresh,
            Some(refresh_key.as_ref()),
        );

        let checks = [
            (TokenPurpose::Bearer, &access),
            (TokenPurpose::Refresh, &renewed),
        ];
        for (purpose, result) in checks {
            if let Err(e) = result {
                warn!(
                    target: "auth.coordinator",
                    %purpose,
                    error = %e,
                    "Refreshed token failed verification"
                );
                if *e == AuthError::SignatureInvalid {
                    // Likely key rotation
                    self.keys.invalidate(purpose);
                }
            }
        }

        access?;
        renewed?;
        Ok(pair)
    }

    async fn exchange_with_retry(&self, refresh_token: &SecretString) -> Result<TokenPair, AuthError> {
        let mut attempt: u32 = 0;

        loop {
            let result = tokio::time::timeout(
                self.policy.refresh_timeout,
                self.api.exchange_refresh_token(refresh_token),
            )
            .await
            .unwrap_or(Err(AuthError::RefreshTimeout));

            match result {
                Ok(pair) => return Ok(pair),
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        target: "auth.coordinator",
                        error = %e,
                        attempt = attempt.saturating_add(1),
                        backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Refresh exchange failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn commit(&self, pair: TokenPair) {
        self.store.save(&pair.new_refresh_token, self.refresh_token_ttl);
        self.state.send_replace(RefreshState::Committed);
        self.tokens.send_replace(SessionTokens {
            bearer: Some(pair.access_token),
            refresh: Some(pair.new_refresh_token),
        });
        info!(target: "auth.coordinator", "Session refreshed");
        self.state.send_replace(RefreshState::Idle);
    }

    fn fail(&self, error: &AuthError) {
        if invalidates_refresh_token(error) {
            self.store.clear();
        }
        self.state.send_replace(RefreshState::Failed);
        self.tokens.send_replace(SessionTokens::default());
        warn!(target: "auth.coordinator", error = %error, "Session refresh failed, session cleared");
    }
}

/// Failures after which the persisted refresh token is useless.
///
/// Transport and key problems leave it in place for a later attempt.
fn invalidates_refresh_token(error: &AuthError) -> bool {
    matches!(
        error,
        AuthError::RefreshRejected(_)
            | AuthError::MissingRefreshToken
            | AuthError::SignatureInvalid
            | AuthError::IssuerMismatch
            | AuthError::TokenExpired
            | AuthError::MalformedToken
    )
}

async fn wait_for_outcome(mut outcome_rx: OutcomeReceiver) -> RefreshOutcome {
    let outcome = match outcome_rx.wait_for(Option::is_some).await {
        Ok(published) => published.clone(),
        Err(_) => None,
    };

    outcome.unwrap_or_else(|| {
        warn!(target: "auth.coordinator", "In-flight expiration check was abandoned");
        RefreshOutcome::Failed(AuthError::RefreshExchange(
            "expiration check abandoned".to_string(),
        ))
    })
}
