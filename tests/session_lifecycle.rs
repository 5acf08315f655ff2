//! Refresh-session lifecycle over HTTP: rotation, revocation, expiry.

use std::net::TcpListener;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use bookstore::auth::memory::{MemorySessionStore, MemoryUserDirectory};
use bookstore::auth::{
    generate_session_token, hash_session_token, RefreshSession, SessionStore, UserDirectory,
};
use bookstore::configuration::{ApplicationSettings, AuthSettings, DatabaseSettings, Settings};
use bookstore::startup::run;

pub struct TestApp {
    pub address: String,
    pub users: Arc<MemoryUserDirectory>,
    pub sessions: Arc<MemorySessionStore>,
}

fn test_settings() -> Settings {
    Settings {
        database: DatabaseSettings {
            username: "unused".to_string(),
            password: "unused".to_string(),
            port: 5432,
            host: "127.0.0.1".to_string(),
            database_name: "unused".to_string(),
        },
        application: ApplicationSettings {
            port: 0,
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        auth: AuthSettings {
            secret: "integration-test-secret-key-32-characters".to_string(),
            access_token_expiry: 420,
            refresh_session_expiry: 180,
            issuer: "bookstore-tests".to_string(),
            cookie_secure: false,
        },
    }
}

async fn spawn_app() -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let users = Arc::new(MemoryUserDirectory::new());
    let sessions = Arc::new(MemorySessionStore::new());

    let users_dyn: Arc<dyn UserDirectory> = users.clone();
    let sessions_dyn: Arc<dyn SessionStore> = sessions.clone();

    let server =
        run(listener, users_dyn, sessions_dyn, test_settings()).expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        users,
        sessions,
    }
}

async fn sign_up(app: &TestApp, email: &str, password: &str) -> Uuid {
    let client = reqwest::Client::new();
    let response = client
        .post(&format!("{}/auth/signup", &app.address))
        .json(&json!({
            "name": "John Doe",
            "email": email,
            "password": password,
            "password_confirmation": password,
        }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(201, response.status().as_u16());

    let body: Value = response.json().await.unwrap();
    Uuid::parse_str(body["user_id"].as_str().unwrap()).unwrap()
}

/// Logs in and returns (access token, plaintext refresh token from the
/// cookie).
async fn log_in(app: &TestApp, email: &str, password: &str, device_id: &str) -> (String, String) {
    let client = reqwest::Client::new();
    let response = client
        .post(&format!("{}/auth/login", &app.address))
        .json(&json!({ "email": email, "password": password, "device_id": device_id }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, response.status().as_u16());

    let refresh_token = extract_refresh_cookie(&response).expect("No refresh cookie set");
    let body: Value = response.json().await.unwrap();

    (
        body["access_token"].as_str().unwrap().to_string(),
        refresh_token,
    )
}

fn extract_refresh_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("refresh_token="))
        .and_then(|v| v.split(';').next())
        .map(|v| v["refresh_token=".len()..].to_string())
}

async fn refresh_with_cookie(app: &TestApp, refresh_token: &str) -> reqwest::Response {
    let client = reqwest::Client::new();
    client
        .post(&format!("{}/auth/refresh", &app.address))
        .header("Cookie", format!("refresh_token={}", refresh_token))
        .send()
        .await
        .expect("Failed to execute request.")
}

#[tokio::test]
async fn refresh_rotates_the_session_and_kills_the_old_token() {
    let app = spawn_app().await;
    sign_up(&app, "a@x.com", "SecurePass1").await;
    let (_, old_refresh) = log_in(&app, "a@x.com", "SecurePass1", "d1").await;

    let response = refresh_with_cookie(&app, &old_refresh).await;
    assert_eq!(200, response.status().as_u16());

    let new_refresh = extract_refresh_cookie(&response).expect("No rotated cookie set");
    assert_ne!(old_refresh, new_refresh);

    let body: Value = response.json().await.unwrap();
    assert!(body.get("access_token").is_some());

    // Still exactly one session for the device.
    assert_eq!(app.sessions.session_count(), 1);

    // Replaying the consumed token is rejected like any unknown session.
    let replay = refresh_with_cookie(&app, &old_refresh).await;
    assert_eq!(401, replay.status().as_u16());
    let replay_body: Value = replay.json().await.unwrap();
    assert_eq!(replay_body["code"], "SESSION_INVALID");

    // The rotated token keeps working.
    let again = refresh_with_cookie(&app, &new_refresh).await;
    assert_eq!(200, again.status().as_u16());
}

#[tokio::test]
async fn refresh_accepts_a_body_token_for_non_browser_clients() {
    let app = spawn_app().await;
    sign_up(&app, "a@x.com", "SecurePass1").await;
    let (_, refresh_token) = log_in(&app, "a@x.com", "SecurePass1", "d1").await;

    let client = reqwest::Client::new();
    let response = client
        .post(&format!("{}/auth/refresh", &app.address))
        .json(&json!({ "refresh_token": refresh_token }))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn refresh_without_a_token_returns_401() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(&format!("{}/auth/refresh", &app.address))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(401, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "SESSION_INVALID");
}

#[tokio::test]
async fn refresh_with_an_unknown_token_returns_401() {
    let app = spawn_app().await;

    let response = refresh_with_cookie(&app, "definitely-not-a-valid-token").await;

    assert_eq!(401, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "SESSION_INVALID");
}

#[tokio::test]
async fn expired_session_is_rejected_and_reaped() {
    let app = spawn_app().await;
    let user_id = sign_up(&app, "a@x.com", "SecurePass1").await;

    // A session whose three-minute TTL ran out a minute ago.
    let token = generate_session_token();
    let mut session = RefreshSession::new(&token, user_id, "d1".to_string(), None, 180);
    session.expires_at = Utc::now() - Duration::seconds(60);
    app.sessions.put(session);

    let response = refresh_with_cookie(&app, &token).await;
    assert_eq!(401, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    // Externally indistinguishable from an unknown session.
    assert_eq!(body["code"], "SESSION_INVALID");

    // The row was reaped on observation.
    let remaining = app
        .sessions
        .find_by_token_hash(&hash_session_token(&token))
        .await
        .unwrap();
    assert!(remaining.is_none());
    assert_eq!(app.sessions.session_count(), 0);
}

#[tokio::test]
async fn logout_is_idempotent_over_http() {
    let app = spawn_app().await;
    sign_up(&app, "a@x.com", "SecurePass1").await;
    let (_, refresh_token) = log_in(&app, "a@x.com", "SecurePass1", "d1").await;

    let client = reqwest::Client::new();
    for _ in 0..2 {
        let response = client
            .post(&format!("{}/auth/logout", &app.address))
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .expect("Failed to execute request.");
        assert_eq!(200, response.status().as_u16());
    }

    // Logging out a token that never existed also succeeds.
    let response = client
        .post(&format!("{}/auth/logout", &app.address))
        .json(&json!({ "refresh_token": "never-issued" }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, response.status().as_u16());

    assert_eq!(app.sessions.session_count(), 0);

    let refresh = refresh_with_cookie(&app, &refresh_token).await;
    assert_eq!(401, refresh.status().as_u16());
}

#[tokio::test]
async fn logout_all_revokes_every_device_but_spares_other_users() {
    let app = spawn_app().await;
    let alice_id = sign_up(&app, "alice@x.com", "SecurePass1").await;
    let bob_id = sign_up(&app, "bob@x.com", "SecurePass2").await;

    let (alice_access, alice_d1) = log_in(&app, "alice@x.com", "SecurePass1", "d1").await;
    let (_, alice_d2) = log_in(&app, "alice@x.com", "SecurePass1", "d2").await;
    let (_, bob_refresh) = log_in(&app, "bob@x.com", "SecurePass2", "d1").await;

    let client = reqwest::Client::new();
    let response = client
        .post(&format!("{}/auth/logout-all", &app.address))
        .header("Authorization", format!("Bearer {}", alice_access))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, response.status().as_u16());

    assert!(app.sessions.sessions_for_user(alice_id).is_empty());
    assert_eq!(app.sessions.sessions_for_user(bob_id).len(), 1);

    // Both of Alice's devices are signed out.
    for token in [&alice_d1, &alice_d2] {
        let response = refresh_with_cookie(&app, token).await;
        assert_eq!(401, response.status().as_u16());
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "SESSION_INVALID");
    }

    // Bob is untouched.
    let response = refresh_with_cookie(&app, &bob_refresh).await;
    assert_eq!(200, response.status().as_u16());

    // Alice's access token remains valid until its own expiry.
    let response = client
        .get(&format!("{}/auth/me", &app.address))
        .header("Authorization", format!("Bearer {}", alice_access))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn logout_all_requires_authentication() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(&format!("{}/auth/logout-all", &app.address))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(401, response.status().as_u16());
}

#[tokio::test]
async fn each_login_opens_its_own_session() {
    let app = spawn_app().await;
    let user_id = sign_up(&app, "a@x.com", "SecurePass1").await;

    // Same device id, three logins: three sessions, by design.
    for _ in 0..3 {
        log_in(&app, "a@x.com", "SecurePass1", "d1").await;
    }

    assert_eq!(app.sessions.sessions_for_user(user_id).len(), 3);
}
