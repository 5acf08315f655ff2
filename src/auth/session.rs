/// Refresh sessions.
///
/// A refresh session binds a long-lived opaque token to a user and a device.
/// Token values are 64 random alphanumeric characters from a
/// cryptographically strong source and are hashed with SHA-256 before
/// storage; the plaintext exists only in the cookie handed to the client.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;

pub const SESSION_TOKEN_LENGTH: usize = 64;

/// Generate a new refresh token value.
///
/// The plaintext is what the client stores; the server keeps only the hash.
pub fn generate_session_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Hash a refresh token for storage and lookup. Plaintext tokens are never
/// written to the database.
pub fn hash_session_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct RefreshSession {
    /// SHA-256 hex of the opaque token; primary key.
    pub token_hash: String,
    pub user_id: Uuid,
    /// Correlates the sessions of one login device. Client-supplied or
    /// server-generated per login.
    pub device_id: String,
    /// Diagnostic only.
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RefreshSession {
    /// Build a session row for a freshly generated token, expiring
    /// `ttl_seconds` from now.
    pub fn new(
        token: &str,
        user_id: Uuid,
        device_id: String,
        user_agent: Option<String>,
        ttl_seconds: i64,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            token_hash: hash_session_token(token),
            user_id,
            device_id,
            user_agent,
            created_at,
            expires_at: created_at + Duration::seconds(ttl_seconds),
        }
    }

    /// A session is expired from its expiry instant onward.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Storage capability for refresh sessions. All session mutation in the
/// system goes through these four operations.
///
/// Storage failures surface as `AppError::Database(..)` so callers can tell
/// "the store is down" apart from "the session does not exist".
/// `delete_all_for_user` is best-effort as of call time with respect to
/// sessions created concurrently for the same user.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Durable write; the session becomes visible only once the insert
    /// commits.
    async fn create(&self, session: &RefreshSession) -> Result<(), AppError>;

    /// Exact-match lookup. Returns whatever row is stored, expired or not;
    /// expiry enforcement belongs to the session manager.
    async fn find_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshSession>, AppError>;

    /// Idempotent removal; deleting a nonexistent token is not an error.
    async fn delete(&self, token_hash: &str) -> Result<(), AppError>;

    /// Removes every session owned by the user.
    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<(), AppError>;
}

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type SessionRow = (
    String,
    Uuid,
    String,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: &RefreshSession) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_sessions (token_hash, user_id, device_id, user_agent, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&session.token_hash)
        .bind(session.user_id)
        .bind(&session.device_id)
        .bind(&session.user_agent)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshSession>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT token_hash, user_id, device_id, user_agent, created_at, expires_at
            FROM refresh_sessions
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(token_hash, user_id, device_id, user_agent, created_at, expires_at)| {
                RefreshSession {
                    token_hash,
                    user_id,
                    device_id,
                    user_agent,
                    created_at,
                    expires_at,
                }
            },
        ))
    }

    async fn delete(&self, token_hash: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM refresh_sessions WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM refresh_sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        tracing::info!(user_id = %user_id, "All refresh sessions removed for user");
        Ok(())
    }
}
