/// In-memory implementations of the storage capabilities.
///
/// Back the session manager and the HTTP layer in tests; no database
/// required. Mutex-guarded maps are sufficient: every critical section is a
/// plain map operation with nothing awaited inside.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::session::{RefreshSession, SessionStore};
use crate::auth::user::{User, UserDirectory};
use crate::error::{AppError, DatabaseError};

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, RefreshSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn sessions_for_user(&self, user_id: Uuid) -> Vec<RefreshSession> {
        self.sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Test hook: plant a session row directly, e.g. one that is already
    /// expired.
    pub fn put(&self, session: RefreshSession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.token_hash.clone(), session);
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &RefreshSession) -> Result<(), AppError> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.token_hash.clone(), session.clone());
        Ok(())
    }

    async fn find_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshSession>, AppError> {
        Ok(self.sessions.lock().unwrap().get(token_hash).cloned())
    }

    async fn delete(&self, token_hash: &str) -> Result<(), AppError> {
        self.sessions.lock().unwrap().remove(token_hash);
        Ok(())
    }

    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<(), AppError> {
        self.sessions
            .lock()
            .unwrap()
            .retain(|_, s| s.user_id != user_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryUserDirectory {
    users: Mutex<HashMap<Uuid, User>>,
    verification_tokens: Mutex<HashMap<String, (Uuid, DateTime<Utc>)>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_count(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    /// Test hook: flip the enabled flag of an existing user.
    pub fn set_enabled(&self, user_id: Uuid, enabled: bool) {
        if let Some(user) = self.users.lock().unwrap().get_mut(&user_id) {
            user.enabled = enabled;
        }
    }

    /// Test hook: the pending verification tokens of a user. Stands in for
    /// the email delivery pipeline, which is outside this service.
    pub fn verification_tokens_for(&self, user_id: Uuid) -> Vec<String> {
        self.verification_tokens
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, (owner, _))| *owner == user_id)
            .map(|(token, _)| token.clone())
            .collect()
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn insert(&self, user: &User) -> Result<(), AppError> {
        let mut users = self.users.lock().unwrap();

        if users.values().any(|u| u.email == user.email) {
            return Err(AppError::Database(DatabaseError::UniqueConstraintViolation(
                "email is already registered".to_string(),
            )));
        }

        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn store_verification_token(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.verification_tokens
            .lock()
            .unwrap()
            .insert(token.to_string(), (user_id, expires_at));
        Ok(())
    }

    async fn consume_verification_token(
        &self,
        token: &str,
    ) -> Result<Option<(Uuid, DateTime<Utc>)>, AppError> {
        Ok(self.verification_tokens.lock().unwrap().remove(token))
    }

    async fn set_email_verified(&self, user_id: Uuid) -> Result<(), AppError> {
        if let Some(user) = self.users.lock().unwrap().get_mut(&user_id) {
            user.email_verified = true;
        }
        Ok(())
    }
}
