/// Static route authorization table.
///
/// Maps route patterns to the access they require. The table is data, built
/// once at startup and consumed by the authentication gate after it has
/// resolved the caller's identity. First matching rule wins; a trailing
/// `/**` matches a whole subtree.

use crate::auth::UserRole;

#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    /// Anonymous callers allowed.
    Public,
    /// Any authenticated caller.
    Authenticated,
    /// Authenticated callers holding the role.
    Role(UserRole),
}

#[derive(Debug, Clone)]
pub struct AccessPolicy {
    rules: Vec<(String, Access)>,
    fallback: Access,
}

impl AccessPolicy {
    pub fn new(fallback: Access) -> Self {
        Self {
            rules: Vec::new(),
            fallback,
        }
    }

    pub fn route(mut self, pattern: &str, access: Access) -> Self {
        self.rules.push((pattern.to_string(), access));
        self
    }

    pub fn access_for(&self, path: &str) -> &Access {
        self.rules
            .iter()
            .find(|(pattern, _)| pattern_matches(pattern, path))
            .map(|(_, access)| access)
            .unwrap_or(&self.fallback)
    }
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix("/**") {
        path == prefix || path.starts_with(&format!("{}/", prefix))
    } else {
        path == pattern
    }
}

/// The authorization table for this server's routes. Unknown paths require
/// authentication.
pub fn default_policy() -> AccessPolicy {
    AccessPolicy::new(Access::Authenticated)
        .route("/health_check", Access::Public)
        .route("/auth/signup", Access::Public)
        .route("/auth/login", Access::Public)
        .route("/auth/refresh", Access::Public)
        .route("/auth/verify-user", Access::Public)
        // Possession of the refresh token is the credential for single
        // logout; the scoped cookie never reaches this path.
        .route("/auth/logout", Access::Public)
        .route("/auth/logout-all", Access::Authenticated)
        .route("/auth/me", Access::Authenticated)
        .route("/admin/**", Access::Role(UserRole::Admin))
}
