use tracing::warn;

#[derive(Debug)]
pub struct AppConfig {
    pub db_namespace: String,
    pub db_database: String,
    pub db_password: Option<String>,
    pub db_username: Option<String>,
    pub db_url: String,
    pub jwt_secret: String,
    pub is_development: bool,
    pub server_port: u16,
    pub request_timeout_secs: u64,
    pub db_tx_retries: u8,
    pub sentry_project_link: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

fn required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError(format!("Missing {name} in env")))
}

fn parsed_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError(format!("{name} must be a number"))),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let db_namespace = std::env::var("DB_NAMESPACE").unwrap_or("namespace".to_string());
        let db_database = std::env::var("DB_DATABASE").unwrap_or("database".to_string());
        let db_password = std::env::var("DB_PASSWORD").ok();
        let db_username = std::env::var("DB_USERNAME").ok();
        let db_url = required("DB_URL")?;
        let jwt_secret = required("JWT_SECRET")?;

        let is_development = std::env::var("DEVELOPMENT")
            .map(|v| v.eq("true"))
            .unwrap_or_else(|_| {
                warn!("DEVELOPMENT not set, assuming production");
                false
            });

        let server_port = parsed_or("SERVER_PORT", 8080u16)?;
        let request_timeout_secs = parsed_or("REQUEST_TIMEOUT_SECS", 30u64)?;
        let db_tx_retries = parsed_or("DB_TX_RETRIES", 3u8)?;
        let sentry_project_link = std::env::var("SENTRY_PROJECT_LINK")
            .ok()
            .filter(|v| !v.is_empty());

        Ok(Self {
            db_namespace,
            db_database,
            db_password,
            db_username,
            db_url,
            jwt_secret,
            is_development,
            server_port,
            request_timeout_secs,
            db_tx_retries,
            sentry_project_link,
        })
    }
}
