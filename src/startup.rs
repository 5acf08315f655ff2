use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::{
    AccessTokenCodec, BcryptVerifier, SessionManager, SessionStore, UserDirectory,
};
use crate::authorization::default_policy;
use crate::configuration::Settings;
use crate::middleware::{AuthGate, CorsLayer, RequestLogger};
use crate::routes::{
    health_check, login, logout, logout_all, me, refresh, signup, verify_user,
};

/// Wire the application and start serving.
///
/// Storage comes in as capabilities so the same wiring runs against
/// Postgres in production and against in-memory fakes in tests.
pub fn run(
    listener: TcpListener,
    users: Arc<dyn UserDirectory>,
    sessions: Arc<dyn SessionStore>,
    settings: Settings,
) -> Result<Server, std::io::Error> {
    let codec = AccessTokenCodec::new(settings.auth.clone());
    let manager = SessionManager::new(
        users.clone(),
        sessions,
        Arc::new(BcryptVerifier),
        codec.clone(),
        settings.auth.clone(),
    );

    let users_data: web::Data<dyn UserDirectory> = web::Data::from(users);
    let manager_data = web::Data::new(manager);
    let auth_settings_data = web::Data::new(settings.auth.clone());
    let allowed_origins = settings.application.allowed_origins.clone();

    let server = HttpServer::new(move || {
        App::new()
            // Outermost to innermost: request logging, CORS, then the
            // authentication gate, which runs once per request before any
            // handler.
            .wrap(AuthGate::new(codec.clone(), default_policy()))
            .wrap(CorsLayer::new(allowed_origins.clone()))
            .wrap(RequestLogger)
            // Shared state
            .app_data(users_data.clone())
            .app_data(manager_data.clone())
            .app_data(auth_settings_data.clone())
            // Route table; who may call what is decided by the
            // authorization table the gate consults, not by nesting.
            .route("/health_check", web::get().to(health_check))
            .route("/auth/signup", web::post().to(signup))
            .route("/auth/login", web::post().to(login))
            .route("/auth/refresh", web::post().to(refresh))
            .route("/auth/verify-user", web::post().to(verify_user))
            .route("/auth/logout", web::post().to(logout))
            .route("/auth/logout-all", web::post().to(logout_all))
            .route("/auth/me", web::get().to(me))
    })
    .listen(listener)?
    .run();

    Ok(server)
}
