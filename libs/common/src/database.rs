//! PostgreSQL pool setup for the user, session and password-reset tables.

use crate::error::{DatabaseError, DatabaseResult};
use sqlx::{
    PgPool,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use std::{env, str::FromStr, time::Duration};
use tracing::{error, info};

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Pool settings
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a caller waits for a free connection, in seconds
    pub connection_timeout: u64,
    /// Idle connections above `min_connections` are closed after this many seconds
    pub idle_timeout: u64,
}

impl DatabaseConfig {
    /// Default pool sizing around an explicit URL
    pub fn with_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            connection_timeout: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT_SECS,
        }
    }

    /// Reads `DATABASE_URL` (required) and the optional `DATABASE_MAX_CONNECTIONS`,
    /// `DATABASE_MIN_CONNECTIONS`, `DATABASE_CONNECTION_TIMEOUT` and
    /// `DATABASE_IDLE_TIMEOUT`. Unparseable optional values fall back to the defaults.
    pub fn from_env() -> DatabaseResult<Self> {
        let url = env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                DatabaseError::Configuration("DATABASE_URL environment variable not set".to_string())
            })?;

        let mut config = Self::with_url(url);
        config.max_connections = env_or("DATABASE_MAX_CONNECTIONS", config.max_connections);
        config.min_connections = env_or("DATABASE_MIN_CONNECTIONS", config.min_connections);
        config.connection_timeout = env_or("DATABASE_CONNECTION_TIMEOUT", config.connection_timeout);
        config.idle_timeout = env_or("DATABASE_IDLE_TIMEOUT", config.idle_timeout);

        if config.min_connections > config.max_connections {
            return Err(DatabaseError::Configuration(format!(
                "DATABASE_MIN_CONNECTIONS ({}) exceeds DATABASE_MAX_CONNECTIONS ({})",
                config.min_connections, config.max_connections
            )));
        }

        Ok(config)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Connect a pool sized by `config`
pub async fn init_pool(config: &DatabaseConfig) -> DatabaseResult<PgPool> {
    let options = PgConnectOptions::from_str(&config.database_url)
        .map_err(|e| DatabaseError::Configuration(format!("Invalid database URL: {}", e)))?;

    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Connecting to PostgreSQL"
    );

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout))
        .idle_timeout(Duration::from_secs(config.idle_timeout))
        .connect_with(options)
        .await
        .map_err(DatabaseError::Connection)
}

/// `Ok(false)` when the server does not answer; connection errors are logged, not returned
pub async fn health_check(pool: &PgPool) -> DatabaseResult<bool> {
    match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await {
        Ok(one) => Ok(one == 1),
        Err(e) => {
            error!("Database health check failed: {}", e);
            Ok(false)
        }
    }
}
