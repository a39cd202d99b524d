//! PostgreSQL store: user records

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{error, info};
use uuid::Uuid;

use super::{StoreError, StoreResult, UserStore};
use crate::models::{Role, User};

/// PostgreSQL-backed implementation of every store trait
#[derive(Clone)]
pub struct PgStore {
    pub(super) pool: PgPool,
}

impl PgStore {
    /// Create a new store over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    let role: String = row.try_get("role").map_err(StoreError::from_query)?;
    let role = role
        .parse::<Role>()
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

    Ok(User {
        id: row.try_get("id").map_err(StoreError::from_query)?,
        email: row.try_get("email").map_err(StoreError::from_query)?,
        password_hash: row.try_get("password_hash").map_err(StoreError::from_query)?,
        role,
        created_at: row.try_get("created_at").map_err(StoreError::from_query)?,
        updated_at: row.try_get("updated_at").map_err(StoreError::from_query)?,
    })
}

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, user: &User) -> StoreResult<()> {
        info!("Creating new user: {}", user.id);

        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match StoreError::from_query(e) {
            StoreError::Conflict => StoreError::Conflict,
            other => {
                error!("Failed to create user: {}", other);
                other
            }
        })?;

        Ok(())
    }

    async fn get_user_by_id(&self, id: Uuid) -> StoreResult<User> {
        let row = sqlx::query(
            r#"
            SELECT id, email, password_hash, role, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_query)?;

        match row {
            Some(row) => user_from_row(&row),
            None => Err(StoreError::NotFound),
        }
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<User> {
        let row = sqlx::query(
            r#"
            SELECT id, email, password_hash, role, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_query)?;

        match row {
            Some(row) => user_from_row(&row),
            None => Err(StoreError::NotFound),
        }
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET email = $1, password_hash = $2, role = $3, updated_at = $4
            WHERE id = $5
            "#,
        )
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(Utc::now())
        .bind(user.id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_query)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
