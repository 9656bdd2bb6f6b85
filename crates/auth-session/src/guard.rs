//! Role-based navigation guard.
//!
//! Decides whether a navigation may proceed given the session and the roles
//! a destination admits. The session is refreshed first, so a page visited
//! with a nearly expired token is evaluated against the renewed one.

use crate::session::AuthSession;
use std::fmt;
use std::str::FromStr;

/// User roles carried in the bearer token's `role` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Admin,
    Superadmin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
            Self::Superadmin => "superadmin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            "superadmin" => Ok(Self::Superadmin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Roles admitted when a destination does not say otherwise.
pub const DEFAULT_AUTHORIZED_ROLES: [Role; 3] = [Role::User, Role::Admin, Role::Superadmin];

/// What to do with a navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// Proceed.
    Allow,
    /// No valid session; send the user to log in.
    RedirectToLogin,
    /// Logged in, but the role is not admitted here.
    Abort,
}

/// Refresh the session if needed, then decide on a navigation.
pub async fn authorize_navigation(session: &AuthSession, allowed: &[Role]) -> AccessDecision {
    session.check_expiration().await;

    if !session.is_authorized() {
        tracing::debug!(target: "auth.guard", "Navigation requires login");
        return AccessDecision::RedirectToLogin;
    }

    let role = session.role().and_then(|role| role.parse::<Role>().ok());
    match role {
        Some(role) if allowed.contains(&role) => AccessDecision::Allow,
        _ => {
            tracing::debug!(target: "auth.guard", ?role, "Role not admitted");
            AccessDecision::Abort
        }
    }
}
