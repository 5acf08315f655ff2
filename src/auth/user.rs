/// User model and the profile-store capability.
///
/// The session core treats the user store as a collaborator: lookups by
/// email and id, plus the signup insert and the email-verification flip.
/// Everything else about a user is immutable from this crate's perspective.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    Customer,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "ADMIN",
            UserRole::Customer => "CUSTOMER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ADMIN" => Some(UserRole::Admin),
            "CUSTOMER" => Some(UserRole::Customer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: UserRole,
    /// Set once the user consumes an email verification token.
    pub email_verified: bool,
    /// Login kill-switch. A disabled account cannot log in or refresh.
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: String, name: String, password_hash: String, role: UserRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            name,
            password_hash,
            role,
            email_verified: false,
            enabled: true,
            created_at: Utc::now(),
        }
    }
}

/// Storage capability for user profiles and their pending email
/// verifications. Kept behind a trait so the session manager and the HTTP
/// layer are testable against in-memory fakes.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;

    /// Persists a new user. A duplicate email fails with a
    /// unique-constraint error.
    async fn insert(&self, user: &User) -> Result<(), AppError>;

    async fn store_verification_token(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Removes the verification token and returns its owner and expiry.
    /// Consuming an unknown token returns `None`.
    async fn consume_verification_token(
        &self,
        token: &str,
    ) -> Result<Option<(Uuid, DateTime<Utc>)>, AppError>;

    async fn set_email_verified(&self, user_id: Uuid) -> Result<(), AppError>;
}

pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type UserRow = (
    Uuid,
    String,
    String,
    String,
    String,
    bool,
    bool,
    DateTime<Utc>,
);

fn row_into_user(row: UserRow) -> Result<User, AppError> {
    let (id, email, name, password_hash, role, email_verified, enabled, created_at) = row;
    let role = UserRole::parse(&role)
        .ok_or_else(|| AppError::Internal(format!("Unknown role in users table: {}", role)))?;

    Ok(User {
        id,
        email,
        name,
        password_hash,
        role,
        email_verified,
        enabled,
        created_at,
    })
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, name, password_hash, role, email_verified, enabled, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_into_user).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, name, password_hash, role, email_verified, enabled, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_into_user).transpose()
    }

    async fn insert(&self, user: &User) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, name, password_hash, role, email_verified, enabled, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.email_verified)
        .bind(user.enabled)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn store_verification_token(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO email_verification_tokens (token, user_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(token)
        .bind(user_id)
        .bind(Utc::now())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn consume_verification_token(
        &self,
        token: &str,
    ) -> Result<Option<(Uuid, DateTime<Utc>)>, AppError> {
        let row = sqlx::query_as::<_, (Uuid, DateTime<Utc>)>(
            r#"
            DELETE FROM email_verification_tokens
            WHERE token = $1
            RETURNING user_id, expires_at
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn set_email_verified(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET email_verified = true WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
