//! PostgreSQL store: password-reset records

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};
use tracing::{debug, error};
use uuid::Uuid;

use super::{PasswordResetStore, PgStore, StoreError, StoreResult};
use crate::models::{PasswordReset, User};

/// Set `used_at` on an unused record, optionally only while it is unexpired
async fn claim_reset<'e, E>(
    executor: E,
    id: Uuid,
    at: DateTime<Utc>,
    unexpired_only: bool,
) -> StoreResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = if unexpired_only {
        "UPDATE password_resets SET used_at = $1 \
         WHERE id = $2 AND used_at IS NULL AND expires_at >= $1"
    } else {
        "UPDATE password_resets SET used_at = $1 WHERE id = $2 AND used_at IS NULL"
    };

    let result = sqlx::query(query)
        .bind(at)
        .bind(id)
        .execute(executor)
        .await
        .map_err(StoreError::from_query)?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

#[async_trait]
impl PasswordResetStore for PgStore {
    async fn create_password_reset(&self, reset: &PasswordReset) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO password_resets (id, user_id, token, expires_at, created_at, used_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(reset.id)
        .bind(reset.user_id)
        .bind(&reset.token)
        .bind(reset.expires_at)
        .bind(reset.created_at)
        .bind(reset.used_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create password reset: {}", e);
            StoreError::from_query(e)
        })?;

        Ok(())
    }

    async fn get_password_reset_by_token(&self, token: &str) -> StoreResult<PasswordReset> {
        sqlx::query_as::<_, PasswordReset>(
            r#"
            SELECT id, user_id, token, expires_at, created_at, used_at
            FROM password_resets
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_query)?
        .ok_or(StoreError::NotFound)
    }

    async fn mark_password_reset_used(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        claim_reset(&self.pool, id, at, false).await
    }

    async fn consume_password_reset(
        &self,
        id: Uuid,
        user: &User,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(StoreError::from_transaction)?;

        if let Err(e) = claim_reset(&mut *tx, id, at, true).await {
            debug!("Password reset {} already consumed or expired", id);
            return Err(e);
        }

        let updated = sqlx::query(
            "UPDATE users SET password_hash = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(&user.password_hash)
        .bind(at)
        .bind(user.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to store new password for user {}: {}", user.id, e);
            StoreError::from_query(e)
        })?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        tx.commit().await.map_err(StoreError::from_transaction)?;
        Ok(())
    }

    async fn delete_expired_password_resets(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM password_resets WHERE expires_at < $1 OR used_at IS NOT NULL",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_query)?;

        Ok(result.rows_affected())
    }
}
