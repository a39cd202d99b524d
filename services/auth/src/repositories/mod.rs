//! Persistence for users, sessions and password-reset records
//!
//! The service only sees the traits below. [`PgStore`] is the production
//! implementation; [`InMemoryStore`] keeps the same semantics in process for
//! tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cv_common::error::DatabaseError;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{PasswordReset, Session, User};

pub mod memory;
pub mod password_reset;
pub mod session;
pub mod user;

pub use memory::InMemoryStore;
pub use user::PgStore;

/// Failures surfaced by every store implementation
#[derive(Debug, Error)]
pub enum StoreError {
    /// The addressed record does not exist (or no longer matches the condition)
    #[error("record not found")]
    NotFound,

    /// A uniqueness constraint rejected the write
    #[error("record already exists")]
    Conflict,

    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// The backing store could not be reached or returned unusable data
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Classify a raw query error
    pub(crate) fn from_query(err: sqlx::Error) -> Self {
        let err = DatabaseError::Query(err);
        if err.is_row_not_found() {
            StoreError::NotFound
        } else if err.is_unique_violation() {
            StoreError::Conflict
        } else {
            StoreError::Database(err)
        }
    }

    /// Classify an error raised while managing a transaction
    pub(crate) fn from_transaction(err: sqlx::Error) -> Self {
        let err = DatabaseError::Transaction(err);
        if err.is_unique_violation() {
            StoreError::Conflict
        } else {
            StoreError::Database(err)
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// User records, keyed by id and unique by email
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user; `Conflict` when the email is taken
    async fn create_user(&self, user: &User) -> StoreResult<()>;

    async fn get_user_by_id(&self, id: Uuid) -> StoreResult<User>;

    async fn get_user_by_email(&self, email: &str) -> StoreResult<User>;

    /// Overwrite email, password hash and role; bumps `updated_at`
    async fn update_user(&self, user: &User) -> StoreResult<()>;
}

/// Refresh-token sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: &Session) -> StoreResult<()>;

    async fn get_session_by_id(&self, id: Uuid) -> StoreResult<Session>;

    async fn get_session_by_token(&self, refresh_token: &str) -> StoreResult<Session>;

    /// `NotFound` when nothing was deleted
    async fn delete_session(&self, id: Uuid) -> StoreResult<()>;

    /// Delete every session of a user, returning how many were removed
    async fn delete_user_sessions(&self, user_id: Uuid) -> StoreResult<u64>;

    /// Atomically replace `old_id` with `new_session`
    ///
    /// Fails with `NotFound` and writes nothing if `old_id` is already gone,
    /// so of two concurrent rotations of the same session only one succeeds.
    async fn rotate_session(&self, old_id: Uuid, new_session: &Session) -> StoreResult<()>;

    /// Delete sessions whose expiry is before `now`
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

/// One-time password-reset records
#[async_trait]
pub trait PasswordResetStore: Send + Sync {
    async fn create_password_reset(&self, reset: &PasswordReset) -> StoreResult<()>;

    async fn get_password_reset_by_token(&self, token: &str) -> StoreResult<PasswordReset>;

    /// Set `used_at` if it is still unset; `NotFound` otherwise
    async fn mark_password_reset_used(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    /// Claim reset `id` and store `user`'s new password hash in one step
    ///
    /// The claim only succeeds while the record is unused and not expired at
    /// `at`; otherwise nothing is written and `NotFound` is returned. Of two
    /// concurrent consumers of the same record at most one succeeds.
    async fn consume_password_reset(
        &self,
        id: Uuid,
        user: &User,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Delete records that expired before `now` or were already used
    async fn delete_expired_password_resets(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

/// Everything the auth service needs from persistence
pub trait AuthStore: UserStore + SessionStore + PasswordResetStore {}

impl<T> AuthStore for T where T: UserStore + SessionStore + PasswordResetStore {}
