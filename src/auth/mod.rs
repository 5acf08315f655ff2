/// Authentication module
///
/// Token lifecycle: access token issuance/validation, refresh session
/// storage and rotation, password hashing, and the session manager that
/// ties them together.

mod claims;
mod jwt;
mod manager;
pub mod memory;
mod password;
mod session;
mod user;

pub use claims::Claims;
pub use jwt::AccessTokenCodec;
pub use manager::{IssuedTokens, SessionManager};
pub use password::{hash_password, verify_password, BcryptVerifier, PasswordVerifier};
pub use session::{
    generate_session_token, hash_session_token, PgSessionStore, RefreshSession, SessionStore,
};
pub use user::{PgUserDirectory, User, UserDirectory, UserRole};
