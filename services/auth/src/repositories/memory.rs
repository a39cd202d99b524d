//! In-process store with the same semantics as [`PgStore`](super::PgStore)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{PasswordResetStore, SessionStore, StoreError, StoreResult, UserStore};
use crate::models::{PasswordReset, Session, User};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    sessions: HashMap<Uuid, Session>,
    password_resets: HashMap<Uuid, PasswordReset>,
}

/// Every table behind one lock, so multi-row operations are atomic
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions for a user
    pub async fn session_count(&self, user_id: Uuid) -> usize {
        let tables = self.tables.lock().await;
        tables
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .count()
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn create_user(&self, user: &User) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.users.contains_key(&user.id)
            || tables.users.values().any(|u| u.email == user.email)
        {
            return Err(StoreError::Conflict);
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user_by_id(&self, id: Uuid) -> StoreResult<User> {
        let tables = self.tables.lock().await;
        tables.users.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<User> {
        let tables = self.tables.lock().await;
        tables
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables
            .users
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(StoreError::Conflict);
        }

        let stored = tables.users.get_mut(&user.id).ok_or(StoreError::NotFound)?;
        stored.email = user.email.clone();
        stored.password_hash = user.password_hash.clone();
        stored.role = user.role;
        stored.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn create_session(&self, session: &Session) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict);
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session_by_id(&self, id: Uuid) -> StoreResult<Session> {
        let tables = self.tables.lock().await;
        tables.sessions.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_session_by_token(&self, refresh_token: &str) -> StoreResult<Session> {
        let tables = self.tables.lock().await;
        tables
            .sessions
            .values()
            .find(|s| s.refresh_token == refresh_token)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn delete_session(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables
            .sessions
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn delete_user_sessions(&self, user_id: Uuid) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| s.user_id != user_id);
        Ok((before - tables.sessions.len()) as u64)
    }

    async fn rotate_session(&self, old_id: Uuid, new_session: &Session) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if !tables.sessions.contains_key(&old_id) {
            return Err(StoreError::NotFound);
        }
        if new_session.id != old_id && tables.sessions.contains_key(&new_session.id) {
            return Err(StoreError::Conflict);
        }
        tables.sessions.remove(&old_id);
        tables.sessions.insert(new_session.id, new_session.clone());
        Ok(())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| s.expires_at >= now);
        Ok((before - tables.sessions.len()) as u64)
    }
}

#[async_trait]
impl PasswordResetStore for InMemoryStore {
    async fn create_password_reset(&self, reset: &PasswordReset) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.password_resets.contains_key(&reset.id)
            || tables.password_resets.values().any(|r| r.token == reset.token)
        {
            return Err(StoreError::Conflict);
        }
        tables.password_resets.insert(reset.id, reset.clone());
        Ok(())
    }

    async fn get_password_reset_by_token(&self, token: &str) -> StoreResult<PasswordReset> {
        let tables = self.tables.lock().await;
        tables
            .password_resets
            .values()
            .find(|r| r.token == token)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn mark_password_reset_used(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        match tables.password_resets.get_mut(&id) {
            Some(reset) if reset.used_at.is_none() => {
                reset.used_at = Some(at);
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn consume_password_reset(
        &self,
        id: Uuid,
        user: &User,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let claimable = tables
            .password_resets
            .get(&id)
            .is_some_and(|r| r.used_at.is_none() && r.expires_at >= at);
        if !claimable || !tables.users.contains_key(&user.id) {
            return Err(StoreError::NotFound);
        }

        if let Some(reset) = tables.password_resets.get_mut(&id) {
            reset.used_at = Some(at);
        }
        if let Some(stored) = tables.users.get_mut(&user.id) {
            stored.password_hash = user.password_hash.clone();
            stored.updated_at = at;
        }
        Ok(())
    }

    async fn delete_expired_password_resets(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.password_resets.len();
        tables
            .password_resets
            .retain(|_, r| r.expires_at >= now && r.used_at.is_none());
        Ok((before - tables.password_resets.len()) as u64)
    }
}
