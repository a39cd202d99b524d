//! Redis cache module for the CV builder backend
//!
//! This module provides the shared Redis connection and the sorted-set
//! commands backing the sliding-window rate limiter.

use anyhow::Result;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::info;

/// Configuration for Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
}

impl RedisConfig {
    /// Create a new RedisConfig from environment variables
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
    pub fn from_env() -> Result<Self> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

        Ok(RedisConfig { url })
    }
}

/// Shared Redis connection
///
/// The multiplexed connection is cheap to clone and safe to use from many
/// tasks at once, so every clone of the pool talks over the same socket.
#[derive(Clone)]
pub struct RedisPool {
    connection: MultiplexedConnection,
}

impl RedisPool {
    /// Open the Redis connection
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.clone())?;
        let connection = client.get_multiplexed_async_connection().await?;
        info!("Redis client initialized");
        Ok(RedisPool { connection })
    }

    fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    /// Delete a key from Redis
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection();
        let _: u64 = conn.del(key).await?;
        Ok(())
    }

    /// Add `member` to the sorted set at `key` with the given score (`ZADD`)
    pub async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()> {
        let mut conn = self.connection();
        let _: i64 = conn.zadd(key, member, score).await?;
        Ok(())
    }

    /// Remove every member scored at or below `max_score` (`ZREMRANGEBYSCORE key -inf max`)
    pub async fn zremrangebyscore(&self, key: &str, max_score: i64) -> Result<u64> {
        let mut conn = self.connection();
        let removed: u64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(max_score)
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }

    /// Number of members in the sorted set (`ZCARD`)
    pub async fn zcard(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection();
        let count: u64 = conn.zcard(key).await?;
        Ok(count)
    }

    /// Lowest score in the sorted set, if any
    pub async fn zmin_score(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.connection();
        let entries: Vec<(String, f64)> = conn.zrange_withscores(key, 0, 0).await?;
        Ok(entries.first().map(|(_, score)| *score as i64))
    }

    /// Set a TTL on a key (`EXPIRE`)
    pub async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.connection();
        let _: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> Result<bool> {
        let mut conn = self.connection();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}
