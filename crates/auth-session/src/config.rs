//! Session client configuration.
//!
//! Configuration is loaded from environment variables. Construct directly
//! with [`Config::new`] and the `with_*` builders in tests and embedding
//! applications.

use crate::coordinator::RefreshPolicy;
use common::config::ObservabilityConfig;
use jsonwebtoken::Algorithm;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default algorithm for both token purposes.
pub const DEFAULT_ALGORITHM: Algorithm = Algorithm::EdDSA;

/// Refresh when the bearer token expires within this window (5 minutes).
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(300);

/// Retries after the first refresh exchange attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Upper bound for `REFRESH_MAX_RETRIES`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Delay before the first retry; doubles per attempt.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(250);

/// Abort a single refresh exchange attempt after this long.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a persisted refresh token stays readable (30 days).
pub const DEFAULT_REFRESH_TOKEN_TTL_DAYS: u64 = 30;

/// Algorithm and issuer a token purpose must be validated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRules {
    /// Signing algorithm. Must be asymmetric.
    pub algorithm: Algorithm,
    /// Expected `iss` claim.
    pub issuer: String,
}

impl TokenRules {
    /// Rules for `issuer` using [`DEFAULT_ALGORITHM`].
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            algorithm: DEFAULT_ALGORITHM,
            issuer: issuer.into(),
        }
    }

    /// Override the algorithm.
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }
}

/// Session client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend base URL (e.g., `https://api.example.com`), no trailing slash.
    pub api_base_url: String,

    /// Validation rules for bearer tokens.
    pub bearer: TokenRules,

    /// Validation rules for refresh tokens.
    pub refresh: TokenRules,

    /// Expiry check, retry, and timeout behavior of the refresh exchange.
    pub refresh_policy: RefreshPolicy,

    /// HTTP request timeout for every backend call.
    pub http_timeout: Duration,

    /// Expiry window applied when persisting the refresh token.
    pub refresh_token_ttl: Duration,

    /// Logging settings for binaries.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid algorithm configuration: {0}")]
    InvalidAlgorithm(String),

    #[error("Invalid refresh policy configuration: {0}")]
    InvalidRefreshPolicy(String),

    #[error("Invalid timeout configuration: {0}")]
    InvalidTimeout(String),
}

impl Config {
    /// Configuration with defaults for everything except the endpoint and issuers.
    #[must_use]
    pub fn new(
        api_base_url: impl Into<String>,
        bearer_issuer: impl Into<String>,
        refresh_issuer: impl Into<String>,
    ) -> Self {
        Self {
            api_base_url: trim_base_url(api_base_url.into()),
            bearer: TokenRules::new(bearer_issuer),
            refresh: TokenRules::new(refresh_issuer),
            refresh_policy: RefreshPolicy::default(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            refresh_token_ttl: Duration::from_secs(DEFAULT_REFRESH_TOKEN_TTL_DAYS * 86_400),
            observability: ObservabilityConfig::default(),
        }
    }

    /// Set the bearer token algorithm.
    #[must_use]
    pub fn with_bearer_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.bearer.algorithm = algorithm;
        self
    }

    /// Set the refresh token algorithm.
    #[must_use]
    pub fn with_refresh_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.refresh.algorithm = algorithm;
        self
    }

    /// Set the refresh policy.
    #[must_use]
    pub fn with_refresh_policy(mut self, policy: RefreshPolicy) -> Self {
        self.refresh_policy = policy;
        self
    }

    /// Set the HTTP timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let api_base_url = required(vars, "AUTH_API_BASE_URL")?;
        let bearer_issuer = required(vars, "BEARER_TOKEN_ISSUER")?;
        let refresh_issuer = required(vars, "REFRESH_TOKEN_ISSUER")?;

        let bearer_algorithm = parse_algorithm(vars, "BEARER_TOKEN_ALGORITHM")?;
        let refresh_algorithm = parse_algorithm(vars, "REFRESH_TOKEN_ALGORITHM")?;

        let threshold_secs = parse_number(
            vars,
            "REFRESH_THRESHOLD_SECONDS",
            DEFAULT_REFRESH_THRESHOLD.as_secs(),
            ConfigError::InvalidRefreshPolicy,
        )?;

        let max_retries = parse_number(
            vars,
            "REFRESH_MAX_RETRIES",
            u64::from(DEFAULT_MAX_RETRIES),
            ConfigError::InvalidRefreshPolicy,
        )?;
        let max_retries = u32::try_from(max_retries)
            .ok()
            .filter(|n| *n <= MAX_RETRIES_LIMIT)
            .ok_or_else(|| {
                ConfigError::InvalidRefreshPolicy(format!(
                    "REFRESH_MAX_RETRIES must be at most {MAX_RETRIES_LIMIT}, got {max_retries}"
                ))
            })?;

        #[allow(clippy::cast_possible_truncation)]
        let backoff_base_ms = parse_number(
            vars,
            "REFRESH_BACKOFF_BASE_MS",
            DEFAULT_BACKOFF_BASE.as_millis() as u64,
            ConfigError::InvalidRefreshPolicy,
        )?;

        #[allow(clippy::cast_possible_truncation)]
        let refresh_timeout_ms = parse_number(
            vars,
            "REFRESH_TIMEOUT_MS",
            DEFAULT_REFRESH_TIMEOUT.as_millis() as u64,
            ConfigError::InvalidTimeout,
        )?;
        if refresh_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout(
                "REFRESH_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }

        let http_timeout_secs = parse_number(
            vars,
            "HTTP_TIMEOUT_SECONDS",
            DEFAULT_HTTP_TIMEOUT.as_secs(),
            ConfigError::InvalidTimeout,
        )?;
        if http_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout(
                "HTTP_TIMEOUT_SECONDS must be greater than zero".to_string(),
            ));
        }

        let ttl_days = parse_number(
            vars,
            "REFRESH_TOKEN_TTL_DAYS",
            DEFAULT_REFRESH_TOKEN_TTL_DAYS,
            ConfigError::InvalidTimeout,
        )?;

        Ok(Self {
            api_base_url: trim_base_url(api_base_url),
            bearer: TokenRules {
                algorithm: bearer_algorithm,
                issuer: bearer_issuer,
            },
            refresh: TokenRules {
                algorithm: refresh_algorithm,
                issuer: refresh_issuer,
            },
            refresh_policy: RefreshPolicy {
                threshold: Duration::from_secs(threshold_secs),
                max_retries,
                backoff_base: Duration::from_millis(backoff_base_ms),
                refresh_timeout: Duration::from_millis(refresh_timeout_ms),
            },
            http_timeout: Duration::from_secs(http_timeout_secs),
            refresh_token_ttl: Duration::from_secs(ttl_days.saturating_mul(86_400)),
            observability: ObservabilityConfig::from_vars(vars),
        })
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn parse_number(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
    err: fn(String) -> ConfigError,
) -> Result<u64, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(value_str) => value_str.trim().parse::<u64>().map_err(|e| {
            err(format!(
                "{name} must be a non-negative integer, got '{value_str}': {e}"
            ))
        }),
    }
}

fn parse_algorithm(vars: &HashMap<String, String>, name: &str) -> Result<Algorithm, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(DEFAULT_ALGORITHM);
    };

    let algorithm = Algorithm::from_str(value_str.trim()).map_err(|_| {
        ConfigError::InvalidAlgorithm(format!("{name} is not a known algorithm: '{value_str}'"))
    })?;

    if matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    ) {
        return Err(ConfigError::InvalidAlgorithm(format!(
            "{name} must be an asymmetric algorithm, got '{value_str}'"
        )));
    }

    Ok(algorithm)
}

fn trim_base_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
