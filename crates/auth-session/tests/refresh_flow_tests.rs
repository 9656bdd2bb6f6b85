//! Session refresh integration tests.
//!
//! Drives `AuthSession` over real HTTP against a mocked auth backend.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use anyhow::Result;
use auth_session::config::Config;
use auth_session::coordinator::RefreshPolicy;
use auth_session::keys::TokenPurpose;
use auth_session::store::{InMemoryRefreshTokenStore, RefreshTokenStore};
use auth_session::{AuthError, AuthSession, RefreshOutcome, RefreshState};
use auth_test_utils::{
    MockAuthBackend, TestSigningKey, TestTokenBuilder, BEARER_KEY_PATH, REFRESH_KEY_PATH,
    TEST_BEARER_ISSUER, TEST_REFRESH_ISSUER,
};
use common::secret::{ExposeSecret, SecretString};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::ResponseTemplate;

const THIRTY_DAYS: Duration = Duration::from_secs(30 * 86_400);

fn config_for(backend: &MockAuthBackend) -> Config {
    Config::new(backend.uri(), TEST_BEARER_ISSUER, TEST_REFRESH_ISSUER).with_refresh_policy(
        RefreshPolicy {
            backoff_base: Duration::from_millis(1),
            ..RefreshPolicy::default()
        },
    )
}

fn session_for(backend: &MockAuthBackend) -> Result<(AuthSession, Arc<InMemoryRefreshTokenStore>)> {
    let store = Arc::new(InMemoryRefreshTokenStore::default());
    let session = AuthSession::connect(&config_for(backend), store.clone())?;
    Ok((session, store))
}

// =============================================================================
// Expiry window
// =============================================================================

#[tokio::test]
async fn test_fresh_token_not_refreshed_and_authorized() -> Result<()> {
    let backend = MockAuthBackend::start().await;
    let (session, _store) = session_for(&backend)?;
    session.restore(
        SecretString::from(backend.bearer_token("alice", "user", 3600)),
        Some(SecretString::from(backend.refresh_token("alice"))),
    );

    let outcome = session.check_expiration().await;

    assert_eq!(outcome, RefreshOutcome::Unchanged);
    assert!(session.is_authorized());
    assert!(backend.refresh_requests().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_token_inside_window_triggers_one_exchange() -> Result<()> {
    let backend = MockAuthBackend::start().await;
    backend
        .respond_to_refresh_with(
            &backend.bearer_token("alice", "user", 3600),
            &backend.refresh_token("alice"),
        )
        .await;
    let (session, _store) = session_for(&backend)?;
    let old_refresh = backend.refresh_token("alice-old");
    session.restore(
        SecretString::from(backend.bearer_token("alice", "user", 120)),
        Some(SecretString::from(old_refresh.clone())),
    );

    let outcome = session.check_expiration().await;

    assert_eq!(outcome, RefreshOutcome::Refreshed);
    let requests = backend.refresh_requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0], json!({ "refreshToken": old_refresh }));
    Ok(())
}

#[tokio::test]
async fn test_expired_token_refreshed_with_new_subject_and_role() -> Result<()> {
    let backend = MockAuthBackend::start().await;
    backend
        .respond_to_refresh_with(
            &backend.bearer_token("bob", "admin", 3600),
            &backend.refresh_token("bob"),
        )
        .await;
    let (session, store) = session_for(&backend)?;
    session.restore(
        SecretString::from(backend.bearer_token("alice", "user", -10)),
        Some(SecretString::from(backend.refresh_token("alice"))),
    );
    assert!(!session.is_authorized());

    assert_eq!(session.check_expiration().await, RefreshOutcome::Refreshed);

    assert!(session.is_authorized());
    assert_eq!(session.subject().as_deref(), Some("bob"));
    assert_eq!(session.role().as_deref(), Some("admin"));
    assert_eq!(session.state(), RefreshState::Idle);
    assert!(store.expires_at().is_some());
    Ok(())
}

// =============================================================================
// Failure paths
// =============================================================================

#[tokio::test]
async fn test_empty_session_sends_sentinel_and_stays_logged_out() -> Result<()> {
    let backend = MockAuthBackend::start().await;
    backend.reject_refresh(401).await;
    let (session, _store) = session_for(&backend)?;

    let outcome = session.check_expiration().await;

    assert_eq!(outcome, RefreshOutcome::Failed(AuthError::MissingRefreshToken));
    assert_eq!(
        backend.refresh_requests().await,
        vec![json!({ "refreshToken": "none" })]
    );
    assert!(!session.is_authorized());
    assert!(session.subject().is_none());
    assert_eq!(session.state(), RefreshState::Failed);
    Ok(())
}

#[tokio::test]
async fn test_rejected_refresh_token_cleared_from_store() -> Result<()> {
    let backend = MockAuthBackend::start().await;
    backend.reject_refresh(401).await;
    let store = Arc::new(InMemoryRefreshTokenStore::with_token(
        SecretString::from("revoked-token"),
        THIRTY_DAYS,
    ));
    let session = AuthSession::connect(&config_for(&backend), store.clone())?;

    let outcome = session.check_expiration().await;

    assert!(matches!(outcome, RefreshOutcome::Failed(AuthError::RefreshRejected(_))));
    assert_eq!(
        backend.refresh_requests().await,
        vec![json!({ "refreshToken": "revoked-token" })]
    );
    assert!(store.load().is_none());
    Ok(())
}

#[tokio::test]
async fn test_forged_access_token_leaves_session_unauthorized() -> Result<()> {
    let backend = MockAuthBackend::start().await;
    let forged = TestSigningKey::from_seed(200).sign(
        &TestTokenBuilder::new()
            .for_user("mallory")
            .with_role("superadmin")
            .issued_by(TEST_BEARER_ISSUER)
            .build(),
    )?;
    backend
        .respond_to_refresh_with(&forged, &backend.refresh_token("mallory"))
        .await;
    let (session, store) = session_for(&backend)?;
    session.restore(
        SecretString::from(backend.bearer_token("alice", "user", -10)),
        Some(SecretString::from(backend.refresh_token("alice"))),
    );

    let outcome = session.check_expiration().await;

    assert_eq!(outcome, RefreshOutcome::Failed(AuthError::SignatureInvalid));
    assert!(!session.is_authorized());
    assert!(session.role().is_none());
    assert!(store.load().is_none());
    Ok(())
}

#[tokio::test]
async fn test_restored_forged_bearer_replaced_before_expiry() -> Result<()> {
    let backend = MockAuthBackend::start().await;
    backend
        .respond_to_refresh_with(
            &backend.bearer_token("alice", "user", 3600),
            &backend.refresh_token("alice"),
        )
        .await;
    let forged = TestSigningKey::from_seed(77).sign(
        &TestTokenBuilder::new()
            .for_user("mallory")
            .with_role("superadmin")
            .issued_by(TEST_BEARER_ISSUER)
            .expires_in(3600)
            .build(),
    )?;
    let (session, _store) = session_for(&backend)?;
    session.restore(
        SecretString::from(forged),
        Some(SecretString::from(backend.refresh_token("alice"))),
    );

    assert_eq!(session.check_expiration().await, RefreshOutcome::Refreshed);
    assert!(session.is_authorized());
    assert_eq!(session.subject().as_deref(), Some("alice"));
    assert_eq!(session.role().as_deref(), Some("user"));

    assert_eq!(session.check_expiration().await, RefreshOutcome::Unchanged);
    assert_eq!(backend.refresh_requests().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_refresh_token_from_wrong_issuer_rejected() -> Result<()> {
    let backend = MockAuthBackend::start().await;
    let wrong_issuer = backend.refresh_signer().sign(
        &TestTokenBuilder::new()
            .for_user("alice")
            .issued_by("someone-else")
            .build(),
    )?;
    backend
        .respond_to_refresh_with(&backend.bearer_token("alice", "user", 3600), &wrong_issuer)
        .await;
    let (session, _store) = session_for(&backend)?;

    let outcome = session.check_expiration().await;

    assert_eq!(outcome, RefreshOutcome::Failed(AuthError::IssuerMismatch));
    assert!(!session.is_authorized());
    Ok(())
}

#[tokio::test]
async fn test_non_bearer_token_type_rejected() -> Result<()> {
    let backend = MockAuthBackend::start().await;
    backend
        .respond_to_refresh(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "accessToken": backend.bearer_token("alice", "user", 3600),
                "newRefreshToken": backend.refresh_token("alice"),
                "tokenType": "mac",
            }
        })))
        .await;
    let (session, _store) = session_for(&backend)?;
    session.restore(
        SecretString::from(backend.bearer_token("alice", "user", -10)),
        Some(SecretString::from(backend.refresh_token("alice"))),
    );

    let outcome = session.check_expiration().await;

    assert!(matches!(outcome, RefreshOutcome::Failed(AuthError::RefreshRejected(_))));
    assert!(!session.is_authorized());
    Ok(())
}

#[tokio::test]
async fn test_legacy_refresh_field_accepted() -> Result<()> {
    let backend = MockAuthBackend::start().await;
    backend
        .respond_to_refresh(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "accessToken": backend.bearer_token("alice", "user", 3600),
                "refreshToken": backend.refresh_token("alice"),
                "tokenType": "bearer",
            }
        })))
        .await;
    let (session, _store) = session_for(&backend)?;

    assert_eq!(session.check_expiration().await, RefreshOutcome::Refreshed);
    assert!(session.is_authorized());
    Ok(())
}

// =============================================================================
// Retry / transport
// =============================================================================

#[tokio::test]
async fn test_transient_server_error_retried() -> Result<()> {
    let backend = MockAuthBackend::start().await;
    backend.fail_refresh_once(503).await;
    backend
        .respond_to_refresh_with(
            &backend.bearer_token("alice", "user", 3600),
            &backend.refresh_token("alice"),
        )
        .await;
    let (session, _store) = session_for(&backend)?;
    session.restore(
        SecretString::from(backend.bearer_token("alice", "user", -10)),
        Some(SecretString::from(backend.refresh_token("alice"))),
    );

    assert_eq!(session.check_expiration().await, RefreshOutcome::Refreshed);
    assert_eq!(backend.refresh_requests().await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_persistent_server_error_keeps_stored_token() -> Result<()> {
    let backend = MockAuthBackend::start().await;
    backend.reject_refresh(503).await;
    let store = Arc::new(InMemoryRefreshTokenStore::with_token(
        SecretString::from("still-good"),
        THIRTY_DAYS,
    ));
    let session = AuthSession::connect(&config_for(&backend), store.clone())?;

    let outcome = session.check_expiration().await;

    assert!(matches!(outcome, RefreshOutcome::Failed(AuthError::RefreshExchange(_))));
    // first attempt plus the default two retries
    assert_eq!(backend.refresh_requests().await.len(), 3);
    assert!(!session.is_authorized());
    assert_eq!(store.load().unwrap().expose_secret(), "still-good");
    Ok(())
}

#[tokio::test]
async fn test_slow_exchange_times_out() -> Result<()> {
    let backend = MockAuthBackend::start().await;
    backend
        .respond_to_refresh(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(500))
                .set_body_json(json!({
                    "data": {
                        "accessToken": backend.bearer_token("alice", "user", 3600),
                        "newRefreshToken": backend.refresh_token("alice"),
                        "tokenType": "bearer",
                    }
                })),
        )
        .await;
    let config = config_for(&backend).with_refresh_policy(RefreshPolicy {
        max_retries: 0,
        refresh_timeout: Duration::from_millis(50),
        ..RefreshPolicy::default()
    });
    let session = AuthSession::connect(&config, Arc::new(InMemoryRefreshTokenStore::default()))?;

    let outcome = session.check_expiration().await;

    assert_eq!(outcome, RefreshOutcome::Failed(AuthError::RefreshTimeout));
    Ok(())
}

// =============================================================================
// Keys
// =============================================================================

#[tokio::test]
async fn test_bearer_key_failure_then_recovery() -> Result<()> {
    let backend = MockAuthBackend::start_without_keys().await;
    backend.fail_key(BEARER_KEY_PATH, 503).await;
    backend
        .serve_key(REFRESH_KEY_PATH, backend.refresh_signer().public_key_pem())
        .await;
    let (session, _store) = session_for(&backend)?;
    session.restore(
        SecretString::from(backend.bearer_token("alice", "user", 3600)),
        None,
    );

    session.check_expiration().await;

    assert!(!session.is_authorized());
    assert_eq!(
        session.verified_claims(),
        Err(AuthError::KeyMissing(TokenPurpose::Bearer))
    );

    // Backend recovers; the next check fetches the key
    backend.reset().await;
    backend
        .serve_key(BEARER_KEY_PATH, backend.bearer_signer().public_key_pem())
        .await;

    assert_eq!(session.check_expiration().await, RefreshOutcome::Unchanged);
    assert!(session.is_authorized());
    Ok(())
}

#[tokio::test]
async fn test_keys_fetched_once_across_refreshes() -> Result<()> {
    let backend = MockAuthBackend::start().await;
    backend
        .respond_to_refresh_with(
            &backend.bearer_token("alice", "user", 60),
            &backend.refresh_token("alice"),
        )
        .await;
    let (session, _store) = session_for(&backend)?;

    // 60s tokens are always inside the window, so each check refreshes
    for _ in 0..3 {
        assert_eq!(session.check_expiration().await, RefreshOutcome::Refreshed);
    }

    assert_eq!(backend.refresh_requests().await.len(), 3);
    assert_eq!(backend.key_requests(BEARER_KEY_PATH).await, 1);
    assert_eq!(backend.key_requests(REFRESH_KEY_PATH).await, 1);
    Ok(())
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_concurrent_checks_make_one_exchange() -> Result<()> {
    let backend = MockAuthBackend::start().await;
    backend
        .respond_to_refresh(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(100))
                .set_body_json(json!({
                    "data": {
                        "accessToken": backend.bearer_token("alice", "user", 3600),
                        "newRefreshToken": backend.refresh_token("alice"),
                        "tokenType": "bearer",
                    }
                })),
        )
        .await;
    let (session, _store) = session_for(&backend)?;
    session.restore(
        SecretString::from(backend.bearer_token("alice", "user", -10)),
        Some(SecretString::from(backend.refresh_token("alice"))),
    );

    let outcomes =
        futures::future::join_all((0..10).map(|_| session.check_expiration())).await;

    assert!(outcomes.iter().all(|o| *o == RefreshOutcome::Refreshed));
    assert_eq!(backend.refresh_requests().await.len(), 1);
    assert!(session.is_authorized());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_checks_across_tasks() -> Result<()> {
    let backend = MockAuthBackend::start().await;
    backend
        .respond_to_refresh(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(100))
                .set_body_json(json!({
                    "data": {
                        "accessToken": backend.bearer_token("alice", "user", 3600),
                        "newRefreshToken": backend.refresh_token("alice"),
                        "tokenType": "bearer",
                    }
                })),
        )
        .await;
    let (session, _store) = session_for(&backend)?;
    let session = Arc::new(session);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.check_expiration().await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await?, RefreshOutcome::Refreshed);
    }

    assert_eq!(backend.refresh_requests().await.len(), 1);
    Ok(())
}

// =============================================================================
// Logout
// =============================================================================

#[tokio::test]
async fn test_logout_ends_session() -> Result<()> {
    let backend = MockAuthBackend::start().await;
    backend
        .respond_to_refresh_with(
            &backend.bearer_token("alice", "user", 3600),
            &backend.refresh_token("alice"),
        )
        .await;
    let (session, store) = session_for(&backend)?;
    session.check_expiration().await;
    assert!(session.is_authorized());

    session.logout().await;

    assert!(!session.is_authorized());
    assert!(store.load().is_none());
    Ok(())
}
