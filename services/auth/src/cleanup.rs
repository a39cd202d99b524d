//! Scheduled sweep of expired sessions and password-reset records

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::repositories::AuthStore;

/// Rows removed by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub sessions: u64,
    pub password_resets: u64,
}

/// Run every sweep once; failures are logged and skipped
pub async fn run_cleanup(store: &dyn AuthStore, now: DateTime<Utc>) -> CleanupReport {
    let mut report = CleanupReport::default();

    match store.delete_expired_sessions(now).await {
        Ok(count) => {
            if count > 0 {
                info!("Cleaned up {} expired sessions", count);
            }
            report.sessions = count;
        }
        Err(e) => error!("Failed to clean up expired sessions: {}", e),
    }

    match store.delete_expired_password_resets(now).await {
        Ok(count) => {
            if count > 0 {
                info!("Cleaned up {} expired or used password resets", count);
            }
            report.password_resets = count;
        }
        Err(e) => error!("Failed to clean up password resets: {}", e),
    }

    report
}

/// Spawn a background task that sweeps every `every`
///
/// The first sweep runs immediately. Abort the returned handle to stop it.
pub fn spawn_cleanup_scheduler(
    store: Arc<dyn AuthStore>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);

        loop {
            interval.tick().await;
            run_cleanup(store.as_ref(), Utc::now()).await;
        }
    })
}
