/// Session manager.
///
/// Orchestrates the token lifecycle: login issues an access token and opens
/// a refresh session, refresh validates and rotates, logout revokes one or
/// all sessions of a user. From the manager's perspective a session is
/// ACTIVE (stored, unexpired), EXPIRED (stored, past expiry, not yet
/// reaped), or ABSENT; EXPIRED rows are reaped the moment they are observed.
///
/// Storage and password checking are capabilities handed in at construction,
/// never concrete bindings, so the whole state machine runs against
/// in-memory fakes in tests.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::auth::jwt::AccessTokenCodec;
use crate::auth::password::PasswordVerifier;
use crate::auth::session::{generate_session_token, hash_session_token, RefreshSession, SessionStore};
use crate::auth::user::{User, UserDirectory};
use crate::configuration::AuthSettings;
use crate::error::{AppError, AuthError};

/// Everything a successful login or refresh hands back. The refresh token
/// is plaintext here; the HTTP layer moves it into the scoped cookie and it
/// is never stored in this form.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub refresh_token: String,
    /// Refresh session lifetime in seconds; also the cookie max-age.
    pub refresh_expires_in: i64,
}

#[derive(Clone)]
pub struct SessionManager {
    users: Arc<dyn UserDirectory>,
    sessions: Arc<dyn SessionStore>,
    verifier: Arc<dyn PasswordVerifier>,
    codec: AccessTokenCodec,
    settings: AuthSettings,
}

impl SessionManager {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        sessions: Arc<dyn SessionStore>,
        verifier: Arc<dyn PasswordVerifier>,
        codec: AccessTokenCodec,
        settings: AuthSettings,
    ) -> Self {
        Self {
            users,
            sessions,
            verifier,
            codec,
            settings,
        }
    }

    /// Authenticate credentials and open a session for the device.
    ///
    /// Unknown email and wrong password fail identically with
    /// `InvalidCredentials`; a disabled account fails with
    /// `AccountDisabled`. When the caller supplies no device id one is
    /// generated, so repeated logins from the same physical device open
    /// distinct sessions. Each login opens exactly one new session and
    /// never reuses an existing one; sessions accumulate until they expire
    /// or are revoked.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        device_id: Option<String>,
        user_agent: Option<String>,
    ) -> Result<IssuedTokens, AppError> {
        let user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or(AppError::Auth(AuthError::InvalidCredentials))?;

        if !user.enabled {
            tracing::warn!(user_id = %user.id, "Login attempt on disabled account");
            return Err(AppError::Auth(AuthError::AccountDisabled));
        }

        if !self.verifier.verify(password, &user.password_hash)? {
            return Err(AppError::Auth(AuthError::InvalidCredentials));
        }

        let device_id = device_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let tokens = self.open_session(&user, device_id, user_agent).await?;

        tracing::info!(user_id = %user.id, "User logged in");
        Ok(tokens)
    }

    /// Exchange a refresh token for a new access token, rotating the
    /// session: the consumed token is deleted and a fresh one is issued for
    /// the same device, so a replayed old token fails immediately.
    ///
    /// An expired session is reaped on observation and surfaces as
    /// `SessionExpired`; an unknown token as `SessionInvalid`. Callers see
    /// both as the same rejection.
    pub async fn refresh(&self, refresh_token: &str) -> Result<IssuedTokens, AppError> {
        let token_hash = hash_session_token(refresh_token);

        let session = self
            .sessions
            .find_by_token_hash(&token_hash)
            .await?
            .ok_or(AppError::Auth(AuthError::SessionInvalid))?;

        if session.is_expired_at(Utc::now()) {
            self.sessions.delete(&token_hash).await?;
            tracing::debug!(user_id = %session.user_id, "Reaped expired refresh session");
            return Err(AppError::Auth(AuthError::SessionExpired));
        }

        let user = match self.users.find_by_id(session.user_id).await? {
            Some(user) if user.enabled => user,
            _ => {
                // Owner gone or disabled: the session has no business
                // outliving the account state.
                self.sessions.delete(&token_hash).await?;
                return Err(AppError::Auth(AuthError::SessionInvalid));
            }
        };

        self.sessions.delete(&token_hash).await?;
        let tokens = self
            .open_session(&user, session.device_id, session.user_agent)
            .await?;

        tracing::info!(user_id = %user.id, "Refresh session rotated");
        Ok(tokens)
    }

    /// Revoke a single session. Succeeds whether or not the token exists.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AppError> {
        self.sessions
            .delete(&hash_session_token(refresh_token))
            .await
    }

    /// Revoke every session the user owns. Outstanding access tokens stay
    /// valid until their own short expiry; there is no access-token
    /// revocation list.
    pub async fn logout_all(&self, user_id: Uuid) -> Result<(), AppError> {
        self.sessions.delete_all_for_user(user_id).await
    }

    async fn open_session(
        &self,
        user: &User,
        device_id: String,
        user_agent: Option<String>,
    ) -> Result<IssuedTokens, AppError> {
        let refresh_token = generate_session_token();
        let session = RefreshSession::new(
            &refresh_token,
            user.id,
            device_id,
            user_agent,
            self.settings.refresh_session_expiry,
        );
        self.sessions.create(&session).await?;

        let access_token = self.codec.issue(user)?;

        Ok(IssuedTokens {
            access_token,
            expires_in: self.settings.access_token_expiry,
            refresh_token,
            refresh_expires_in: self.settings.refresh_session_expiry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::memory::{MemorySessionStore, MemoryUserDirectory};
    use crate::auth::user::UserRole;
    use chrono::Duration;

    /// Compares plaintext, skipping bcrypt in state-machine tests.
    struct PlainTextVerifier;

    impl PasswordVerifier for PlainTextVerifier {
        fn verify(&self, password: &str, password_hash: &str) -> Result<bool, AppError> {
            Ok(password == password_hash)
        }
    }

    fn test_settings() -> AuthSettings {
        AuthSettings {
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            access_token_expiry: 420,
            refresh_session_expiry: 180,
            issuer: "test".to_string(),
            cookie_secure: true,
        }
    }

    struct Harness {
        users: Arc<MemoryUserDirectory>,
        sessions: Arc<MemorySessionStore>,
        manager: SessionManager,
    }

    fn harness() -> Harness {
        let users = Arc::new(MemoryUserDirectory::new());
        let sessions = Arc::new(MemorySessionStore::new());
        let settings = test_settings();
        let manager = SessionManager::new(
            users.clone(),
            sessions.clone(),
            Arc::new(PlainTextVerifier),
            AccessTokenCodec::new(settings.clone()),
            settings,
        );
        Harness {
            users,
            sessions,
            manager,
        }
    }

    async fn seed_user(harness: &Harness, email: &str, password: &str) -> User {
        let user = User::new(
            email.to_string(),
            "Test User".to_string(),
            password.to_string(),
            UserRole::Customer,
        );
        harness.users.insert(&user).await.unwrap();
        user
    }

    #[tokio::test]
    async fn login_issues_tokens_and_opens_one_session() {
        let h = harness();
        let user = seed_user(&h, "a@x.com", "p1").await;

        let tokens = h
            .manager
            .login("a@x.com", "p1", None, Some("agent/1.0".to_string()))
            .await
            .unwrap();

        let claims = AccessTokenCodec::new(test_settings())
            .validate(&tokens.access_token)
            .unwrap();
        assert_eq!(claims.email(), "a@x.com");
        assert_eq!(claims.user_id().unwrap(), user.id);

        assert_eq!(h.sessions.session_count(), 1);
        let stored = &h.sessions.sessions_for_user(user.id)[0];
        assert_eq!(stored.token_hash, hash_session_token(&tokens.refresh_token));
        assert_eq!(stored.user_agent.as_deref(), Some("agent/1.0"));
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_fail_identically() {
        let h = harness();
        seed_user(&h, "a@x.com", "p1").await;

        let unknown = h.manager.login("b@x.com", "p1", None, None).await;
        let wrong = h.manager.login("a@x.com", "wrong", None, None).await;

        assert!(matches!(
            unknown,
            Err(AppError::Auth(AuthError::InvalidCredentials))
        ));
        assert!(matches!(
            wrong,
            Err(AppError::Auth(AuthError::InvalidCredentials))
        ));
        assert_eq!(h.sessions.session_count(), 0);
    }

    #[tokio::test]
    async fn disabled_account_cannot_login() {
        let h = harness();
        let user = seed_user(&h, "a@x.com", "p1").await;
        h.users.set_enabled(user.id, false);

        let result = h.manager.login("a@x.com", "p1", None, None).await;
        assert!(matches!(
            result,
            Err(AppError::Auth(AuthError::AccountDisabled))
        ));
    }

    #[tokio::test]
    async fn missing_device_id_gets_a_generated_one() {
        let h = harness();
        let user = seed_user(&h, "a@x.com", "p1").await;

        h.manager.login("a@x.com", "p1", None, None).await.unwrap();

        let sessions = h.sessions.sessions_for_user(user.id);
        assert!(Uuid::parse_str(&sessions[0].device_id).is_ok());
    }

    #[tokio::test]
    async fn repeated_logins_from_one_device_accumulate_sessions() {
        let h = harness();
        let user = seed_user(&h, "a@x.com", "p1").await;

        for _ in 0..3 {
            h.manager
                .login("a@x.com", "p1", Some("device-1".to_string()), None)
                .await
                .unwrap();
        }

        // One new session per login; no coalescing.
        assert_eq!(h.sessions.sessions_for_user(user.id).len(), 3);
    }

    #[tokio::test]
    async fn refresh_within_ttl_rotates_the_session() {
        let h = harness();
        let user = seed_user(&h, "a@x.com", "p1").await;

        let first = h
            .manager
            .login("a@x.com", "p1", Some("device-1".to_string()), None)
            .await
            .unwrap();

        let second = h.manager.refresh(&first.refresh_token).await.unwrap();

        assert_ne!(first.refresh_token, second.refresh_token);
        assert_eq!(h.sessions.session_count(), 1);

        // Device correlation survives rotation.
        assert_eq!(h.sessions.sessions_for_user(user.id)[0].device_id, "device-1");

        // The consumed token is invalid immediately.
        let replay = h.manager.refresh(&first.refresh_token).await;
        assert!(matches!(
            replay,
            Err(AppError::Auth(AuthError::SessionInvalid))
        ));
    }

    #[tokio::test]
    async fn refresh_of_unknown_token_fails_with_invalid_session() {
        let h = harness();

        let result = h.manager.refresh("never-issued").await;
        assert!(matches!(
            result,
            Err(AppError::Auth(AuthError::SessionInvalid))
        ));
    }

    /// Session with a 3-minute TTL: refreshing 2 minutes in succeeds;
    /// refreshing the surviving token 4 minutes after creation fails and
    /// reaps the row.
    #[tokio::test]
    async fn refresh_after_expiry_fails_and_reaps_the_row() {
        let h = harness();
        let user = seed_user(&h, "a@x.com", "p1").await;

        let token = generate_session_token();
        let mut session =
            RefreshSession::new(&token, user.id, "device-1".to_string(), None, 180);

        // Two minutes into a three-minute TTL: still active.
        session.expires_at = Utc::now() + Duration::seconds(60);
        h.sessions.put(session.clone());
        let rotated = h.manager.refresh(&token).await.unwrap();
        assert!(!rotated.access_token.is_empty());

        // Four minutes in: past expiry.
        let stale_token = generate_session_token();
        let mut stale =
            RefreshSession::new(&stale_token, user.id, "device-1".to_string(), None, 180);
        stale.expires_at = Utc::now() - Duration::seconds(60);
        h.sessions.put(stale);

        let result = h.manager.refresh(&stale_token).await;
        assert!(matches!(
            result,
            Err(AppError::Auth(AuthError::SessionExpired))
        ));

        // The expired row is gone.
        let remaining = h
            .sessions
            .find_by_token_hash(&hash_session_token(&stale_token))
            .await
            .unwrap();
        assert!(remaining.is_none());
    }

    #[tokio::test]
    async fn exactly_at_expiry_counts_as_expired() {
        let h = harness();
        let user = seed_user(&h, "a@x.com", "p1").await;

        let token = generate_session_token();
        let mut session =
            RefreshSession::new(&token, user.id, "device-1".to_string(), None, 180);
        session.expires_at = Utc::now();
        h.sessions.put(session);

        let result = h.manager.refresh(&token).await;
        assert!(matches!(
            result,
            Err(AppError::Auth(AuthError::SessionExpired))
        ));
    }

    #[tokio::test]
    async fn refresh_for_a_disabled_owner_drops_the_session() {
        let h = harness();
        let user = seed_user(&h, "a@x.com", "p1").await;

        let tokens = h.manager.login("a@x.com", "p1", None, None).await.unwrap();
        h.users.set_enabled(user.id, false);

        let result = h.manager.refresh(&tokens.refresh_token).await;
        assert!(matches!(
            result,
            Err(AppError::Auth(AuthError::SessionInvalid))
        ));
        assert_eq!(h.sessions.session_count(), 0);
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let h = harness();
        seed_user(&h, "a@x.com", "p1").await;

        let tokens = h.manager.login("a@x.com", "p1", None, None).await.unwrap();

        h.manager.logout(&tokens.refresh_token).await.unwrap();
        assert_eq!(h.sessions.session_count(), 0);

        // Logging out again, or logging out a token that never existed,
        // still succeeds.
        h.manager.logout(&tokens.refresh_token).await.unwrap();
        h.manager.logout("never-issued").await.unwrap();
    }

    #[tokio::test]
    async fn logout_all_spares_other_users() {
        let h = harness();
        let alice = seed_user(&h, "alice@x.com", "p1").await;
        let bob = seed_user(&h, "bob@x.com", "p2").await;

        // Alice on two devices, Bob on one.
        let a1 = h
            .manager
            .login("alice@x.com", "p1", Some("d1".to_string()), None)
            .await
            .unwrap();
        let a2 = h
            .manager
            .login("alice@x.com", "p1", Some("d2".to_string()), None)
            .await
            .unwrap();
        h.manager.login("bob@x.com", "p2", None, None).await.unwrap();

        h.manager.logout_all(alice.id).await.unwrap();

        assert!(h.sessions.sessions_for_user(alice.id).is_empty());
        assert_eq!(h.sessions.sessions_for_user(bob.id).len(), 1);

        // Both of Alice's refresh tokens are now dead.
        for token in [&a1.refresh_token, &a2.refresh_token] {
            let result = h.manager.refresh(token).await;
            assert!(matches!(
                result,
                Err(AppError::Auth(AuthError::SessionInvalid))
            ));
        }
    }
}
