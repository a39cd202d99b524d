//! Process configuration, read once from the environment at startup

use anyhow::{Context, Result};
use cv_common::{cache::RedisConfig, database::DatabaseConfig};
use std::net::SocketAddr;
use std::time::Duration;

use crate::{jwt::JwtConfig, password::Argon2Params, rate_limiter::RateLimiterConfig};

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    pub request_timeout: Duration,
    pub cleanup_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            request_timeout: Duration::from_secs(15),
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

impl ServerConfig {
    /// Create a new ServerConfig from environment variables
    ///
    /// # Environment Variables
    /// - `BIND_ADDRESS`: Listen address (default: "0.0.0.0:8080")
    /// - `REQUEST_TIMEOUT_SECS`: Per-request deadline (default: 15)
    /// - `CLEANUP_INTERVAL_SECS`: Expiry sweep period (default: 3600)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let bind_address = match std::env::var("BIND_ADDRESS") {
            Ok(value) => value
                .parse()
                .with_context(|| format!("Invalid BIND_ADDRESS: {}", value))?,
            Err(_) => defaults.bind_address,
        };

        Ok(Self {
            bind_address,
            request_timeout: secs_or("REQUEST_TIMEOUT_SECS", defaults.request_timeout),
            cleanup_interval: secs_or("CLEANUP_INTERVAL_SECS", defaults.cleanup_interval),
        })
    }
}

fn secs_or(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Everything the service needs to start
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub argon2: Argon2Params,
    pub rate_limit: RateLimiterConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            redis: RedisConfig::from_env()?,
            jwt: JwtConfig::from_env()?,
            argon2: Argon2Params::from_env()?,
            rate_limit: RateLimiterConfig::from_env(),
        })
    }
}
