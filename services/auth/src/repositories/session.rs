//! PostgreSQL store: refresh-token sessions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};
use tracing::{debug, error};
use uuid::Uuid;

use super::{PgStore, SessionStore, StoreError, StoreResult};
use crate::models::Session;

const SESSION_COLUMNS: &str =
    "id, user_id, refresh_token, user_agent, client_ip, expires_at, created_at";

async fn insert_session<'e, E>(executor: E, session: &Session) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO sessions (id, user_id, refresh_token, user_agent, client_ip, expires_at, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(session.id)
    .bind(session.user_id)
    .bind(&session.refresh_token)
    .bind(&session.user_agent)
    .bind(&session.client_ip)
    .bind(session.expires_at)
    .bind(session.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create_session(&self, session: &Session) -> StoreResult<()> {
        insert_session(&self.pool, session).await.map_err(|e| {
            error!("Failed to create session: {}", e);
            StoreError::from_query(e)
        })
    }

    async fn get_session_by_id(&self, id: Uuid) -> StoreResult<Session> {
        let query = format!("SELECT {} FROM sessions WHERE id = $1", SESSION_COLUMNS);
        sqlx::query_as::<_, Session>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from_query)?
            .ok_or(StoreError::NotFound)
    }

    async fn get_session_by_token(&self, refresh_token: &str) -> StoreResult<Session> {
        let query = format!(
            "SELECT {} FROM sessions WHERE refresh_token = $1",
            SESSION_COLUMNS
        );
        sqlx::query_as::<_, Session>(&query)
            .bind(refresh_token)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from_query)?
            .ok_or(StoreError::NotFound)
    }

    async fn delete_session(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_query)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_user_sessions(&self, user_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_query)?;

        Ok(result.rows_affected())
    }

    async fn rotate_session(&self, old_id: Uuid, new_session: &Session) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(StoreError::from_transaction)?;

        let deleted = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(old_id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from_query)?;

        if deleted.rows_affected() == 0 {
            debug!("Session {} already rotated or revoked", old_id);
            // Dropping the transaction rolls it back
            return Err(StoreError::NotFound);
        }

        insert_session(&mut *tx, new_session)
            .await
            .map_err(StoreError::from_query)?;

        tx.commit().await.map_err(StoreError::from_transaction)?;
        Ok(())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_query)?;

        Ok(result.rows_affected())
    }
}
