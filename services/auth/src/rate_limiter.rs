//! Sliding-window rate limiter backed by a sorted set per key
//!
//! Every admitted request adds one member scored with its timestamp in
//! milliseconds. A check first evicts members older than the window and
//! rejects once the remaining count reaches the limit.
//!
//! The limiter fails open: if the counter store cannot be read the request
//! is admitted and a warning is logged. An outage of the counter store
//! therefore disables throttling rather than the API.

use anyhow::Result;
use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::Utc;
use cv_common::cache::RedisPool;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

const KEY_PREFIX: &str = "ratelimit:";
/// Extra lifetime of a window key beyond the interval itself
const KEY_TTL_GRACE_SECS: u64 = 60;

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Requests admitted per window and key
    pub max_requests: u64,
    /// Window length in seconds
    pub window_seconds: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_seconds: 60,
        }
    }
}

impl RateLimiterConfig {
    /// Create a new RateLimiterConfig from environment variables
    ///
    /// Zero or unparsable values fall back to the defaults.
    ///
    /// # Environment Variables
    /// - `RATE_LIMIT_MAX_REQUESTS`: Requests per window (default: 100)
    /// - `RATE_LIMIT_WINDOW_SECS`: Window length in seconds (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let positive = |name: &str, default: u64| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default)
        };

        Self {
            max_requests: positive("RATE_LIMIT_MAX_REQUESTS", defaults.max_requests),
            window_seconds: positive("RATE_LIMIT_WINDOW_SECS", defaults.window_seconds),
        }
    }

    fn window_millis(&self) -> i64 {
        i64::try_from(self.window_seconds.saturating_mul(1000)).unwrap_or(i64::MAX)
    }
}

/// Returned when a key has used up its window
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limit exceeded ({current} requests in window)")]
    Exceeded {
        /// Requests counted in the current window
        current: u64,
        /// Seconds until the oldest counted request leaves the window
        retry_after_secs: u64,
    },
}

/// Sorted-set operations the limiter needs from its counter store
///
/// Scores are millisecond timestamps.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Remove members scored at or below `max_score`
    async fn remove_range_by_score(&self, key: &str, max_score: i64) -> Result<u64>;

    /// Number of members under `key`
    async fn cardinality(&self, key: &str) -> Result<u64>;

    async fn add(&self, key: &str, member: &str, score: i64) -> Result<()>;

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<()>;

    /// Lowest score under `key`, if any
    async fn earliest_score(&self, key: &str) -> Result<Option<i64>>;
}

#[async_trait]
impl WindowStore for RedisPool {
    async fn remove_range_by_score(&self, key: &str, max_score: i64) -> Result<u64> {
        self.zremrangebyscore(key, max_score).await
    }

    async fn cardinality(&self, key: &str) -> Result<u64> {
        self.zcard(key).await
    }

    async fn add(&self, key: &str, member: &str, score: i64) -> Result<()> {
        self.zadd(key, member, score).await
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<()> {
        RedisPool::expire(self, key, ttl_seconds).await
    }

    async fn earliest_score(&self, key: &str) -> Result<Option<i64>> {
        self.zmin_score(key).await
    }
}

/// In-process window store
///
/// Mirrors the Redis semantics: a key disappears once its last member is
/// evicted or its TTL passes. Expired keys are swept on every insert.
#[derive(Clone, Default)]
pub struct MemoryWindowStore {
    windows: Arc<Mutex<HashMap<String, Window>>>,
}

#[derive(Default)]
struct Window {
    entries: Vec<(String, i64)>,
    expires_at: Option<Instant>,
}

impl Window {
    fn is_live(&self, now: Instant) -> bool {
        !self.entries.is_empty() && self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held
    pub async fn key_count(&self) -> usize {
        let now = Instant::now();
        let windows = self.windows.lock().await;
        windows.values().filter(|w| w.is_live(now)).count()
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn remove_range_by_score(&self, key: &str, max_score: i64) -> Result<u64> {
        let mut windows = self.windows.lock().await;
        let Some(window) = windows.get_mut(key) else {
            return Ok(0);
        };
        let before = window.entries.len();
        window.entries.retain(|(_, score)| *score > max_score);
        let removed = (before - window.entries.len()) as u64;
        if window.entries.is_empty() {
            windows.remove(key);
        }
        Ok(removed)
    }

    async fn cardinality(&self, key: &str) -> Result<u64> {
        let now = Instant::now();
        let windows = self.windows.lock().await;
        Ok(windows
            .get(key)
            .filter(|w| w.is_live(now))
            .map_or(0, |w| w.entries.len() as u64))
    }

    async fn add(&self, key: &str, member: &str, score: i64) -> Result<()> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        windows.retain(|_, w| w.is_live(now));

        let window = windows.entry(key.to_string()).or_default();
        match window.entries.iter_mut().find(|(m, _)| m == member) {
            Some(existing) => existing.1 = score,
            None => window.entries.push((member.to_string(), score)),
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<()> {
        let mut windows = self.windows.lock().await;
        if let Some(window) = windows.get_mut(key) {
            window.expires_at = Some(Instant::now() + Duration::from_secs(ttl_seconds));
        }
        Ok(())
    }

    async fn earliest_score(&self, key: &str) -> Result<Option<i64>> {
        let now = Instant::now();
        let windows = self.windows.lock().await;
        Ok(windows
            .get(key)
            .filter(|w| w.is_live(now))
            .and_then(|w| w.entries.iter().map(|(_, score)| *score).min()))
    }
}

/// Rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    store: Arc<dyn WindowStore>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(config: RateLimiterConfig, store: Arc<dyn WindowStore>) -> Self {
        Self { config, store }
    }

    /// Count a request against `key` at the current time
    ///
    /// Returns the number of requests in the window including this one.
    pub async fn check_rate_limit(&self, key: &str) -> Result<u64, RateLimitError> {
        self.check_rate_limit_at(key, Utc::now().timestamp_millis())
            .await
    }

    /// Count a request against `key` at `now_ms` (milliseconds since the epoch)
    pub async fn check_rate_limit_at(&self, key: &str, now_ms: i64) -> Result<u64, RateLimitError> {
        let window_ms = self.config.window_millis();
        let window_start = now_ms.saturating_sub(window_ms);

        if let Err(e) = self.store.remove_range_by_score(key, window_start).await {
            warn!("Rate limiter could not evict old entries, allowing request: {}", e);
            return Ok(0);
        }

        let count = match self.store.cardinality(key).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Rate limiter could not count entries, allowing request: {}", e);
                return Ok(0);
            }
        };

        if count >= self.config.max_requests {
            let retry_after_secs = self.retry_after(key, now_ms, window_ms).await;
            debug!(
                "Rate limit exceeded for {}: {} requests, retry in {}s",
                key, count, retry_after_secs
            );
            return Err(RateLimitError::Exceeded {
                current: count,
                retry_after_secs,
            });
        }

        let member = format!("{}-{}", now_ms, Uuid::new_v4().simple());
        if let Err(e) = self.store.add(key, &member, now_ms).await {
            warn!("Rate limiter could not record request: {}", e);
        }
        if let Err(e) = self
            .store
            .expire(key, self.config.window_seconds + KEY_TTL_GRACE_SECS)
            .await
        {
            warn!("Rate limiter could not set key expiry: {}", e);
        }

        Ok(count + 1)
    }

    async fn retry_after(&self, key: &str, now_ms: i64, window_ms: i64) -> u64 {
        let full_window = self.config.window_seconds.max(1);
        match self.store.earliest_score(key).await {
            Ok(Some(oldest)) => {
                let remaining_ms = oldest.saturating_add(window_ms).saturating_sub(now_ms);
                if remaining_ms <= 0 {
                    1
                } else {
                    (remaining_ms as u64).div_ceil(1000)
                }
            }
            _ => full_window,
        }
    }

    /// Get the rate limiter configuration
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }
}

/// Resolve the client address for rate limiting
///
/// Order: first `X-Forwarded-For` entry, `X-Real-IP`, then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Window key for a client address and request path
///
/// The pair is hashed into a name-based UUID, so keys have a fixed length
/// whatever the header contents.
pub fn rate_limit_key(ip: &str, path: &str) -> String {
    let id = Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("{}|{}", ip, path).as_bytes());
    format!("{}{}", KEY_PREFIX, id)
}
