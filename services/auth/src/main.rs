use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cv_auth::{
    AppState,
    cleanup::spawn_cleanup_scheduler,
    config::AppConfig,
    jwt::JwtService,
    password::PasswordHasher,
    rate_limiter::RateLimiter,
    repositories::{AuthStore, PgStore},
    routes,
    service::{AuthService, LogNotifier},
};
use cv_common::{cache::RedisPool, database};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting authentication service");

    let config = AppConfig::from_env()?;

    // Initialize database connection pool
    let pool = database::init_pool(&config.database).await?;
    if database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    // Initialize Redis connection
    let redis_pool = RedisPool::new(&config.redis).await?;
    if !redis_pool.health_check().await.unwrap_or(false) {
        warn!("Redis did not answer PING; rate limiting will fail open");
    }

    let store: Arc<dyn AuthStore> = Arc::new(PgStore::new(pool));
    let jwt_service = JwtService::new(config.jwt.clone())?;
    let hasher = PasswordHasher::new(config.argon2);
    let auth_service = AuthService::new(store.clone(), jwt_service, hasher, Arc::new(LogNotifier));
    let rate_limiter = RateLimiter::new(config.rate_limit.clone(), Arc::new(redis_pool));

    let app_state = AppState {
        auth_service,
        rate_limiter,
    };

    let cleanup = spawn_cleanup_scheduler(store, config.server.cleanup_interval);

    // Start the web server
    let app = routes::create_router(app_state, config.server.request_timeout);

    let listener = TcpListener::bind(config.server.bind_address).await?;
    info!(
        "Authentication service listening on {}",
        config.server.bind_address
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    cleanup.abort();
    info!("Authentication service stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
