/// Authentication routes.
///
/// Signup, login, token refresh, email verification, logout, and the
/// identity probe. The refresh token travels exclusively in an http-only
/// cookie scoped to the refresh endpoint; response bodies carry only the
/// short-lived access token.

use actix_web::cookie::time::Duration as CookieDuration;
use actix_web::cookie::Cookie;
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{hash_password, Claims, IssuedTokens, SessionManager, User, UserDirectory, UserRole};
use crate::configuration::AuthSettings;
use crate::error::{AppError, AuthError, ValidationError};
use crate::validators::{is_valid_email, is_valid_name};

pub const REFRESH_COOKIE: &str = "refresh_token";
const REFRESH_COOKIE_PATH: &str = "/auth/refresh";
const VERIFICATION_TOKEN_TTL_HOURS: i64 = 24;

#[derive(Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
    pub name: String,
    pub role: Option<UserRole>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub device_id: Option<String>,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct VerifyUserRequest {
    pub token: String,
}

/// Access token response; the refresh token rides in the cookie.
#[derive(Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub role: UserRole,
}

fn refresh_cookie(tokens: &IssuedTokens, settings: &AuthSettings) -> Cookie<'static> {
    Cookie::build(REFRESH_COOKIE, tokens.refresh_token.clone())
        .http_only(true)
        .secure(settings.cookie_secure)
        .path(REFRESH_COOKIE_PATH)
        .max_age(CookieDuration::seconds(tokens.refresh_expires_in))
        .finish()
}

fn token_response(tokens: IssuedTokens, settings: &AuthSettings) -> HttpResponse {
    let cookie = refresh_cookie(&tokens, settings);
    HttpResponse::Ok().cookie(cookie).json(AuthResponse {
        access_token: tokens.access_token,
        token_type: "Bearer".to_string(),
        expires_in: tokens.expires_in,
    })
}

/// POST /auth/signup
///
/// Create a user account. The account can log in right away; a pending
/// email verification token is issued alongside it and handed to the
/// delivery pipeline (external to this service).
///
/// # Errors
/// - 400: invalid email/name, weak password, or mismatched confirmation
/// - 409: email already registered
pub async fn signup(
    form: web::Json<SignUpRequest>,
    users: web::Data<dyn UserDirectory>,
) -> Result<HttpResponse, AppError> {
    let email = is_valid_email(&form.email)?;
    let name = is_valid_name(&form.name)?;

    if form.password != form.password_confirmation {
        return Err(AppError::Validation(ValidationError::InvalidFormat(
            "password confirmation".to_string(),
        )));
    }

    let password_hash = hash_password(&form.password)?;
    let role = form.role.unwrap_or(UserRole::Customer);

    let user = User::new(email, name, password_hash, role);
    users.insert(&user).await?;

    let verification_token = Uuid::new_v4().to_string();
    let expires_at = Utc::now() + Duration::hours(VERIFICATION_TOKEN_TTL_HOURS);
    users
        .store_verification_token(user.id, &verification_token, expires_at)
        .await?;

    // Link delivery is someone else's job; the token is only logged here.
    tracing::info!(
        user_id = %user.id,
        verification_token = %verification_token,
        "User registered, verification pending"
    );

    Ok(HttpResponse::Created().json(serde_json::json!({
        "message": "User registered successfully",
        "user_id": user.id.to_string(),
    })))
}

/// POST /auth/login
///
/// Authenticate with email and password. Returns the access token in the
/// body and sets the refresh cookie (http-only, secure per configuration,
/// path-restricted to the refresh endpoint, max-age equal to the session
/// TTL).
///
/// # Errors
/// - 401: unknown email or wrong password, indistinguishably
/// - 403: account disabled
pub async fn login(
    form: web::Json<LoginRequest>,
    req: HttpRequest,
    manager: web::Data<SessionManager>,
    settings: web::Data<AuthSettings>,
) -> Result<HttpResponse, AppError> {
    let email = is_valid_email(&form.email)
        .map_err(|_| AppError::Auth(AuthError::InvalidCredentials))?;

    let user_agent = req
        .headers()
        .get("User-Agent")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    let tokens = manager
        .login(&email, &form.password, form.device_id.clone(), user_agent)
        .await?;

    Ok(token_response(tokens, settings.get_ref()))
}

/// POST /auth/refresh
///
/// Exchange the refresh cookie for a new access token. The session is
/// rotated: the old refresh token dies here and the cookie is replaced.
/// Non-browser clients may send the token in the JSON body instead.
///
/// # Errors
/// - 401: unknown, rotated-away, or expired refresh token (uniform)
pub async fn refresh(
    req: HttpRequest,
    form: Option<web::Json<RefreshRequest>>,
    manager: web::Data<SessionManager>,
    settings: web::Data<AuthSettings>,
) -> Result<HttpResponse, AppError> {
    let refresh_token = req
        .cookie(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .or_else(|| form.map(|f| f.refresh_token.clone()))
        .ok_or(AppError::Auth(AuthError::SessionInvalid))?;

    let tokens = manager.refresh(&refresh_token).await?;

    Ok(token_response(tokens, settings.get_ref()))
}

/// POST /auth/verify-user
///
/// Consume an email verification token and mark the account verified.
///
/// # Errors
/// - 400: unknown or expired token
pub async fn verify_user(
    form: web::Json<VerifyUserRequest>,
    users: web::Data<dyn UserDirectory>,
) -> Result<HttpResponse, AppError> {
    let consumed = users.consume_verification_token(&form.token).await?;

    match consumed {
        Some((user_id, expires_at)) if expires_at > Utc::now() => {
            users.set_email_verified(user_id).await?;
            tracing::info!(user_id = %user_id, "Email verified");
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "message": "The account is verified",
            })))
        }
        _ => Err(AppError::Validation(ValidationError::InvalidFormat(
            "verification token".to_string(),
        ))),
    }
}

/// POST /auth/logout
///
/// Revoke a single refresh session. Succeeds whether or not the session
/// existed; logging out twice is fine.
pub async fn logout(
    form: web::Json<LogoutRequest>,
    manager: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    manager.logout(&form.refresh_token).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Logged out successfully",
    })))
}

/// POST /auth/logout-all
///
/// Revoke every refresh session of the authenticated caller, across all
/// devices. The user identifier comes from the verified access token, so a
/// caller can only log out their own devices. Access tokens already in the
/// wild stay valid until their short expiry.
pub async fn logout_all(
    claims: web::ReqData<Claims>,
    manager: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let user_id = claims.user_id()?;
    manager.logout_all(user_id).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Logged out of all devices",
    })))
}

/// GET /auth/me
///
/// Identity probe: echoes the identity resolved by the authentication
/// gate. Reads nothing from storage.
pub async fn me(claims: web::ReqData<Claims>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(UserResponse {
        id: claims.uid.clone(),
        email: claims.email().to_string(),
        role: claims.role,
    }))
}
