/// JWT claims carried by access tokens.
///
/// Standard RFC 7519 fields plus the user id and role. The role rides in
/// the token so route authorization never needs a storage lookup.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::user::UserRole;
use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject: the user's email
    pub sub: String,
    /// User id as UUID string
    pub uid: String,
    /// Role granted at issue time
    pub role: UserRole,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Issuer
    pub iss: String,
}

impl Claims {
    pub fn new(
        user_id: Uuid,
        email: String,
        role: UserRole,
        expiry_seconds: i64,
        issuer: String,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: email,
            uid: user_id.to_string(),
            role,
            exp: now + expiry_seconds,
            iat: now,
            iss: issuer,
        }
    }

    /// Extract the user id from the claims.
    ///
    /// # Errors
    /// Returns an error if the id claim is not a valid UUID.
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.uid)
            .map_err(|_| AppError::Internal("Invalid user ID in token".to_string()))
    }

    pub fn email(&self) -> &str {
        &self.sub
    }

    pub fn is_expired(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        self.exp <= now
    }
}
