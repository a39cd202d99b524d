#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use cv_auth::{
    AppState,
    jwt::{JwtConfig, JwtService},
    models::User,
    password::{Argon2Params, PasswordHasher},
    rate_limiter::{MemoryWindowStore, RateLimiter, RateLimiterConfig},
    repositories::InMemoryStore,
    routes::create_router,
    service::{AuthService, ResetNotifier},
};

pub const TEST_SECRET: &str = "integration-test-secret";

/// Captures issued reset tokens instead of mailing them
#[derive(Default)]
pub struct RecordingNotifier {
    tokens: Mutex<Vec<(String, String)>>,
    delay: Mutex<Duration>,
}

impl RecordingNotifier {
    /// Make every delivery take `delay` before it is recorded
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Poll until a token for `email` is recorded or two seconds pass
    pub async fn wait_for_token(&self, email: &str) -> Option<String> {
        for _ in 0..200 {
            if let Some(token) = self.last_token_for(email) {
                return Some(token);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    pub fn last_token_for(&self, email: &str) -> Option<String> {
        self.tokens
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(e, _)| e == email)
            .map(|(_, token)| token.clone())
    }
}

#[async_trait]
impl ResetNotifier for RecordingNotifier {
    async fn notify(&self, user: &User, reset_token: &str) -> anyhow::Result<()> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.tokens
            .lock()
            .unwrap()
            .push((user.email.clone(), reset_token.to_string()));
        Ok(())
    }
}

pub fn jwt_service() -> JwtService {
    JwtService::new(JwtConfig::with_secret(TEST_SECRET)).unwrap()
}

pub fn cheap_hasher() -> PasswordHasher {
    PasswordHasher::new(Argon2Params {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
        salt_length: 16,
        key_length: 32,
    })
}

pub struct TestApp {
    pub store: InMemoryStore,
    pub notifier: Arc<RecordingNotifier>,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_rate_limit(RateLimiterConfig {
            max_requests: 1_000,
            window_seconds: 60,
        })
    }

    pub fn with_rate_limit(config: RateLimiterConfig) -> Self {
        let store = InMemoryStore::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let auth_service = AuthService::new(
            Arc::new(store.clone()),
            jwt_service(),
            cheap_hasher(),
            notifier.clone(),
        );
        let rate_limiter = RateLimiter::new(config, Arc::new(MemoryWindowStore::new()));

        Self {
            store,
            notifier,
            state: AppState {
                auth_service,
                rate_limiter,
            },
        }
    }

    pub fn service(&self) -> &AuthService {
        &self.state.auth_service
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone(), Duration::from_secs(5))
    }
}
