//! Session probe
//!
//! Bootstraps a session from `AUTH_REFRESH_TOKEN`, runs one expiration
//! check against the configured backend and reports the result. Exits
//! non-zero when the session ends up unauthorized.

use auth_session::config::Config;
use auth_session::store::InMemoryRefreshTokenStore;
use auth_session::{AuthSession, RefreshOutcome};
use common::config::ObservabilityConfig;
use common::secret::{non_empty, SecretString};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    if observability.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    init_tracing(&config.observability);

    info!(
        api_base_url = %config.api_base_url,
        bearer_algorithm = ?config.bearer.algorithm,
        refresh_algorithm = ?config.refresh.algorithm,
        threshold_secs = config.refresh_policy.threshold.as_secs(),
        max_retries = config.refresh_policy.max_retries,
        "Configuration loaded"
    );

    let persisted = non_empty(std::env::var("AUTH_REFRESH_TOKEN").ok().map(SecretString::from));
    let store = match persisted {
        Some(token) => InMemoryRefreshTokenStore::with_token(token, config.refresh_token_ttl),
        None => {
            warn!("AUTH_REFRESH_TOKEN not set, exchange will send no refresh token");
            InMemoryRefreshTokenStore::default()
        }
    };

    let session = AuthSession::connect(&config, Arc::new(store)).map_err(|e| {
        error!("Failed to build session: {}", e);
        e
    })?;

    if let Err(e) = session.prefetch_keys().await {
        warn!(error = %e, "Key prefetch failed");
    }

    match session.check_expiration().await {
        RefreshOutcome::Unchanged => info!("Session unchanged"),
        RefreshOutcome::Refreshed => info!("Session refreshed"),
        RefreshOutcome::Failed(e) => warn!(error = %e, "Session refresh failed"),
    }

    if session.is_authorized() {
        info!(role = ?session.role(), "Session authorized");
        Ok(ExitCode::SUCCESS)
    } else {
        warn!("Session not authorized");
        Ok(ExitCode::FAILURE)
    }
}
