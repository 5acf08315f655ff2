use config::ConfigError;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub auth: AuthSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    pub port: u16,
    /// Origins allowed to make credentialed cross-origin calls.
    pub allowed_origins: Vec<String>,
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// Token and session settings.
///
/// Loaded once at startup and never mutated while the process runs; rotating
/// the signing secret requires a restart and invalidates all outstanding
/// access tokens, acceptable given their short lifetime.
#[derive(serde::Deserialize, Clone)]
pub struct AuthSettings {
    pub secret: String,
    pub access_token_expiry: i64,    // seconds (e.g., 420 for 7 minutes)
    pub refresh_session_expiry: i64, // seconds (e.g., 180 for 3 minutes)
    pub issuer: String,
    /// Whether the refresh cookie carries the Secure flag. Disable only for
    /// plain-HTTP development setups.
    pub cookie_secure: bool,
}

pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .build()?;
    settings.try_deserialize::<Settings>()
}
