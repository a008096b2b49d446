use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,
    /// Maximum database connections in pool
    pub database_max_connections: u32,
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Secret used to sign access tokens
    pub jwt_secret: String,
    /// Access token lifetime in seconds (default: 3600 = 1 hour)
    pub jwt_expires_in_secs: u64,
    /// Refresh token lifetime in seconds (default: 604800 = 7 days)
    pub jwt_refresh_expires_in_secs: u64,
    /// Lowest port handed to agent workers (inclusive)
    pub agent_port_min: u16,
    /// Highest port handed to agent workers (inclusive)
    pub agent_port_max: u16,
    /// Path to the worker program every agent is launched from
    pub agent_worker_path: PathBuf,
    /// Expected interval between worker heartbeats
    pub heartbeat_interval: Duration,
    /// How long a starting worker may take to report ready
    pub ready_timeout: Duration,
    /// Grace period between SIGTERM and SIGKILL on stop
    pub grace_timeout: Duration,
    /// Automatic restarts allowed before an agent is parked in error
    pub max_restarts: i32,
    /// Delay before an automatic restart after a crash
    pub restart_backoff: Duration,
    /// How long a draining supervisor waits before force-stopping agents
    pub shutdown_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = match env::var("DATABASE_URL") {
            Ok(url) => url,
            // Compose from the individual DB_* parts when no URL is given.
            Err(_) => {
                let host = env::var("DB_HOST")
                    .map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL or DB_HOST"))?;
                let port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
                let name = env::var("DB_NAME").map_err(|_| ConfigError::MissingEnvVar("DB_NAME"))?;
                let user = env::var("DB_USER").map_err(|_| ConfigError::MissingEnvVar("DB_USER"))?;
                let password = env::var("DB_PASSWORD").unwrap_or_default();
                format!("postgres://{user}:{password}@{host}:{port}/{name}")
            }
        };

        let database_max_connections = parse_var("DATABASE_MAX_CONNECTIONS", 10)?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_var("PORT", 8080)?;

        let jwt_secret =
            env::var("JWT_SECRET").map_err(|_| ConfigError::MissingEnvVar("JWT_SECRET"))?;
        let jwt_expires_in_secs = parse_var("JWT_EXPIRES_IN_SECS", 3600)?;
        let jwt_refresh_expires_in_secs = parse_var("JWT_REFRESH_EXPIRES_IN_SECS", 604_800)?;

        let agent_port_min: u16 = parse_var("AGENT_PORT_MIN", 3001)?;
        let agent_port_max: u16 = parse_var("AGENT_PORT_MAX", 3100)?;
        if agent_port_min < 1024 || agent_port_min > agent_port_max {
            return Err(ConfigError::InvalidValue("AGENT_PORT_MIN"));
        }

        let agent_worker_path = PathBuf::from(
            env::var("AGENT_WORKER_PATH").unwrap_or_else(|_| "./agent-worker".to_string()),
        );

        let heartbeat_interval = duration_var("HEARTBEAT_INTERVAL_MS", 30_000)?;
        let ready_timeout = duration_var("READY_TIMEOUT_MS", 30_000)?;
        let grace_timeout = duration_var("GRACE_TIMEOUT_MS", 10_000)?;
        let max_restarts = parse_var("MAX_RESTARTS", 3)?;
        let restart_backoff = duration_var("RESTART_BACKOFF_MS", 5_000)?;
        let shutdown_timeout = duration_var("SHUTDOWN_TIMEOUT_MS", 30_000)?;

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            jwt_secret,
            jwt_expires_in_secs,
            jwt_refresh_expires_in_secs,
            agent_port_min,
            agent_port_max,
            agent_worker_path,
            heartbeat_interval,
            ready_timeout,
            grace_timeout,
            max_restarts,
            restart_backoff,
            shutdown_timeout,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
    }
}

fn duration_var(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_millis(parse_var(name, default_ms)?))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
