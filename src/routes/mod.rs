mod auth;
mod health_check;

pub use auth::{login, logout, logout_all, me, refresh, signup, verify_user, REFRESH_COOKIE};
pub use health_check::health_check;
