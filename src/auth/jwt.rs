/// Access token codec.
///
/// Issues and validates the short-lived, stateless access credential.
/// Signing is symmetric HMAC (HS256) over the configured secret, so
/// validation needs no storage lookup and never blocks. The codec holds its
/// settings explicitly; several codecs with different secrets can coexist,
/// which is what a versioned key rotation scheme (or a rotation test) needs.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::auth::claims::Claims;
use crate::auth::user::User;
use crate::configuration::AuthSettings;
use crate::error::{AppError, AuthError};

#[derive(Clone)]
pub struct AccessTokenCodec {
    settings: AuthSettings,
}

impl AccessTokenCodec {
    pub fn new(settings: AuthSettings) -> Self {
        Self { settings }
    }

    /// Lifetime of issued tokens, in seconds.
    pub fn token_lifetime(&self) -> i64 {
        self.settings.access_token_expiry
    }

    /// Produce a signed token for the user with expiry `now + access TTL`.
    ///
    /// # Errors
    /// Returns an error if token serialization fails.
    pub fn issue(&self, user: &User) -> Result<String, AppError> {
        let claims = Claims::new(
            user.id,
            user.email.clone(),
            user.role,
            self.settings.access_token_expiry,
            self.settings.issuer.clone(),
        );

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.settings.secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Verify signature, issuer, and expiry, and return the claims.
    /// Side-effect free; consults no storage.
    ///
    /// # Errors
    /// Fails with `AuthError::TokenInvalid` if the token is malformed,
    /// tampered with, from another issuer, or expired. Expiry has zero
    /// leeway: a token is rejected from its expiry instant onward.
    pub fn validate(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[&self.settings.issuer]);

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.settings.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!("Access token validation failed: {}", e);
            AppError::Auth(AuthError::TokenInvalid)
        })?;

        // The decoder treats exp == now as still live; the expiry instant
        // itself must already count as expired.
        if claims.is_expired() {
            return Err(AppError::Auth(AuthError::TokenInvalid));
        }

        Ok(claims)
    }
}
