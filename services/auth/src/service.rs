//! Authentication service
//!
//! Orchestrates the password hasher, the token engine and the stores for
//! every account flow. Handlers only talk to [`AuthService`].

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::jwt::{Claims, JwtService, TokenError};
use crate::models::{ClientInfo, PasswordReset, Role, Session, User};
use crate::password::PasswordHasher;
use crate::repositories::{AuthStore, StoreError};

/// Upper bound on any configured lifetime (100 years)
const MAX_LIFETIME_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Service-level failures, stable across transports
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown email or wrong password; the two are indistinguishable
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("user already exists")]
    UserAlreadyExists,

    #[error("user not found")]
    UserNotFound,

    #[error("invalid token")]
    InvalidToken,

    #[error("token expired")]
    TokenExpired,

    /// A valid token of another kind was presented
    #[error("wrong token type")]
    WrongTokenType,

    /// The refresh token has no live session behind it
    #[error("invalid session")]
    InvalidSession,

    #[error("password reset expired")]
    PasswordResetExpired,

    #[error("password reset already used")]
    PasswordResetUsed,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AuthError::TokenExpired,
            TokenError::Invalid => AuthError::InvalidToken,
            TokenError::WrongType { .. } => AuthError::WrongTokenType,
            TokenError::Signing(msg) => {
                AuthError::Internal(anyhow::anyhow!("failed to sign token: {}", msg))
            }
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::Internal(anyhow::Error::new(err))
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Token pair returned by login and refresh
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

/// Secondary effect of a password reset that did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetWarning {
    /// Existing sessions could not be revoked
    SessionInvalidationFailed,
}

/// Result of a committed password change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResetOutcome {
    pub warnings: Vec<ResetWarning>,
}

impl ResetOutcome {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Delivers freshly issued password-reset tokens to their owner
#[async_trait]
pub trait ResetNotifier: Send + Sync {
    async fn notify(&self, user: &User, reset_token: &str) -> anyhow::Result<()>;
}

/// Notifier that only records the issuance in the log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl ResetNotifier for LogNotifier {
    async fn notify(&self, user: &User, reset_token: &str) -> anyhow::Result<()> {
        info!(
            "Password reset issued for user {} (token {})",
            user.id,
            token_fingerprint(reset_token)
        );
        Ok(())
    }
}

/// Short, non-reversible tag for correlating a token in logs
pub fn token_fingerprint(token: &str) -> String {
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, token.as_bytes()).simple().to_string();
    digest[..8].to_string()
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn AuthStore>,
    jwt: JwtService,
    hasher: PasswordHasher,
    notifier: Arc<dyn ResetNotifier>,
}

impl AuthService {
    /// Create a new auth service
    pub fn new(
        store: Arc<dyn AuthStore>,
        jwt: JwtService,
        hasher: PasswordHasher,
        notifier: Arc<dyn ResetNotifier>,
    ) -> Self {
        Self {
            store,
            jwt,
            hasher,
            notifier,
        }
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    fn lifetime(seconds: u64) -> Duration {
        Duration::seconds(seconds.min(MAX_LIFETIME_SECS) as i64)
    }

    /// Create an account
    ///
    /// The role defaults to [`Role::User`].
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        role: Option<Role>,
    ) -> AuthResult<User> {
        match self.store.get_user_by_email(email).await {
            Ok(_) => return Err(AuthError::UserAlreadyExists),
            Err(StoreError::NotFound) => {}
            Err(e) => {
                error!("Failed to look up user during registration: {}", e);
                return Err(e.into());
            }
        }

        let password_hash = self.hasher.hash_blocking(password).await?;
        let user = User::new(email, password_hash, role.unwrap_or_default());

        match self.store.create_user(&user).await {
            Ok(()) => {}
            // Lost a race with a concurrent registration
            Err(StoreError::Conflict) => return Err(AuthError::UserAlreadyExists),
            Err(e) => {
                error!("Failed to create user: {}", e);
                return Err(e.into());
            }
        }

        info!("Registered user {}", user.id);
        Ok(user)
    }

    /// Exchange credentials for a token pair and open a session
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: &ClientInfo,
    ) -> AuthResult<TokenPair> {
        let user = match self.store.get_user_by_email(email).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => {
                self.hasher.verify_decoy_blocking(password).await?;
                debug!("Login attempt for unknown account");
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => {
                error!("Failed to look up user during login: {}", e);
                return Err(e.into());
            }
        };

        if !self
            .hasher
            .verify_blocking(password, &user.password_hash)
            .await?
        {
            debug!("Password mismatch for user {}", user.id);
            return Err(AuthError::InvalidCredentials);
        }

        let (pair, session) = self.issue_pair(&user, client)?;
        self.store.create_session(&session).await.map_err(|e| {
            error!("Failed to create session for user {}: {}", user.id, e);
            AuthError::from(e)
        })?;

        info!("User {} logged in", user.id);
        Ok(pair)
    }

    fn issue_pair(&self, user: &User, client: &ClientInfo) -> AuthResult<(TokenPair, Session)> {
        let access_token = self
            .jwt
            .generate_access_token(user.id, &user.email, user.role)?;
        let refresh_token = self
            .jwt
            .generate_refresh_token(user.id, &user.email, user.role)?;

        let expires_at = Utc::now() + Self::lifetime(self.jwt.refresh_token_expiry());
        let session = Session::new(user.id, refresh_token.clone(), client, expires_at);

        let pair = TokenPair {
            access_token,
            refresh_token,
            expires_in: self.jwt.access_token_expiry(),
        };
        Ok((pair, session))
    }

    /// Rotate a refresh token
    ///
    /// The old session is replaced atomically, so a refresh token is accepted
    /// at most once.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        client: &ClientInfo,
    ) -> AuthResult<TokenPair> {
        let claims = self.jwt.validate_refresh_token(refresh_token)?;
        let user = self.get_user(claims.user_id).await?;

        let session = match self.store.get_session_by_token(refresh_token).await {
            Ok(session) => session,
            Err(StoreError::NotFound) => return Err(AuthError::InvalidSession),
            Err(e) => return Err(e.into()),
        };

        if session.user_id != user.id {
            warn!("Refresh token presented for a session of another user");
            return Err(AuthError::InvalidSession);
        }

        if session.is_expired_at(Utc::now()) {
            if let Err(e) = self.store.delete_session(session.id).await {
                debug!("Could not delete expired session {}: {}", session.id, e);
            }
            return Err(AuthError::TokenExpired);
        }

        let (pair, new_session) = self.issue_pair(&user, client)?;
        match self.store.rotate_session(session.id, &new_session).await {
            Ok(()) => {}
            Err(StoreError::NotFound) => {
                debug!("Session {} was rotated concurrently", session.id);
                return Err(AuthError::InvalidSession);
            }
            Err(e) => {
                error!("Failed to rotate session {}: {}", session.id, e);
                return Err(e.into());
            }
        }

        Ok(pair)
    }

    /// End the session behind a refresh token; unknown tokens are a no-op
    pub async fn logout(&self, refresh_token: &str) -> AuthResult<()> {
        let session = match self.store.get_session_by_token(refresh_token).await {
            Ok(session) => session,
            Err(StoreError::NotFound) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        match self.store.delete_session(session.id).await {
            Ok(()) | Err(StoreError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// End every session of a user, returning how many were open
    pub async fn logout_all(&self, user_id: Uuid) -> AuthResult<u64> {
        let revoked = self.store.delete_user_sessions(user_id).await?;
        info!("Revoked {} sessions for user {}", revoked, user_id);
        Ok(revoked)
    }

    /// Issue and record a password-reset token
    ///
    /// Returns [`AuthError::UserNotFound`] for unknown emails; callers facing
    /// clients must not reveal that distinction.
    pub async fn request_password_reset(&self, email: &str) -> AuthResult<String> {
        let user = match self.store.get_user_by_email(email).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => return Err(AuthError::UserNotFound),
            Err(e) => return Err(e.into()),
        };

        let token = self.jwt.generate_reset_token(user.id, &user.email)?;
        let expires_at = Utc::now() + Self::lifetime(self.jwt.reset_token_expiry());
        let reset = PasswordReset::new(user.id, token.clone(), expires_at);

        self.store.create_password_reset(&reset).await.map_err(|e| {
            error!("Failed to store password reset for user {}: {}", user.id, e);
            AuthError::from(e)
        })?;

        if let Err(e) = self.notifier.notify(&user, &token).await {
            warn!("Failed to deliver password reset for user {}: {}", user.id, e);
        }

        Ok(token)
    }

    /// Change a password with a reset token
    ///
    /// The reset record is claimed in the same store operation that writes the
    /// new hash, so a token authorizes at most one change. Revoking the user's
    /// sessions afterwards is best-effort and reported through the outcome.
    pub async fn reset_password(
        &self,
        reset_token: &str,
        new_password: &str,
    ) -> AuthResult<ResetOutcome> {
        let claims = self.jwt.validate_reset_token(reset_token)?;
        let mut user = self.get_user(claims.user_id).await?;

        let reset = match self.store.get_password_reset_by_token(reset_token).await {
            Ok(reset) => reset,
            Err(StoreError::NotFound) => return Err(AuthError::InvalidToken),
            Err(e) => return Err(e.into()),
        };

        if reset.user_id != user.id {
            warn!("Password reset record does not belong to the token subject");
            return Err(AuthError::InvalidToken);
        }
        if reset.is_expired_at(Utc::now()) {
            return Err(AuthError::PasswordResetExpired);
        }
        if reset.is_used() {
            return Err(AuthError::PasswordResetUsed);
        }

        user.password_hash = self.hasher.hash_blocking(new_password).await?;
        let now = Utc::now();
        user.updated_at = now;

        match self.store.consume_password_reset(reset.id, &user, now).await {
            Ok(()) => {}
            // Claimed by a concurrent reset, or expired while hashing
            Err(StoreError::NotFound) if reset.is_expired_at(now) => {
                return Err(AuthError::PasswordResetExpired);
            }
            Err(StoreError::NotFound) => {
                debug!("Password reset {} was consumed concurrently", reset.id);
                return Err(AuthError::PasswordResetUsed);
            }
            Err(e) => {
                error!("Failed to update password for user {}: {}", user.id, e);
                return Err(e.into());
            }
        }
        info!("Password changed for user {}", user.id);

        let mut outcome = ResetOutcome::default();
        match self.store.delete_user_sessions(user.id).await {
            Ok(revoked) => debug!("Revoked {} sessions after password reset", revoked),
            Err(e) => {
                error!("Failed to revoke sessions for user {}: {}", user.id, e);
                outcome.warnings.push(ResetWarning::SessionInvalidationFailed);
            }
        }

        Ok(outcome)
    }

    /// Validate an access token and return its claims
    pub fn validate_access_token(&self, token: &str) -> AuthResult<Claims> {
        Ok(self.jwt.validate_access_token(token)?)
    }

    /// Look up a user by id
    pub async fn get_user(&self, user_id: Uuid) -> AuthResult<User> {
        match self.store.get_user_by_id(user_id).await {
            Ok(user) => Ok(user),
            Err(StoreError::NotFound) => Err(AuthError::UserNotFound),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::JwtConfig;
    use crate::password::Argon2Params;
    use crate::repositories::{
        InMemoryStore, PasswordResetStore, SessionStore, StoreResult, UserStore,
    };
    use chrono::DateTime;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Delegates to [`InMemoryStore`] with switchable failures
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryStore,
        fail_consume: AtomicBool,
        fail_session_purge: AtomicBool,
    }

    fn outage() -> StoreError {
        StoreError::Unavailable("connection reset".to_string())
    }

    #[async_trait]
    impl UserStore for FlakyStore {
        async fn create_user(&self, user: &User) -> StoreResult<()> {
            self.inner.create_user(user).await
        }
        async fn get_user_by_id(&self, id: Uuid) -> StoreResult<User> {
            self.inner.get_user_by_id(id).await
        }
        async fn get_user_by_email(&self, email: &str) -> StoreResult<User> {
            self.inner.get_user_by_email(email).await
        }
        async fn update_user(&self, user: &User) -> StoreResult<()> {
            self.inner.update_user(user).await
        }
    }

    #[async_trait]
    impl SessionStore for FlakyStore {
        async fn create_session(&self, session: &Session) -> StoreResult<()> {
            self.inner.create_session(session).await
        }
        async fn get_session_by_id(&self, id: Uuid) -> StoreResult<Session> {
            self.inner.get_session_by_id(id).await
        }
        async fn get_session_by_token(&self, refresh_token: &str) -> StoreResult<Session> {
            self.inner.get_session_by_token(refresh_token).await
        }
        async fn delete_session(&self, id: Uuid) -> StoreResult<()> {
            self.inner.delete_session(id).await
        }
        async fn delete_user_sessions(&self, user_id: Uuid) -> StoreResult<u64> {
            if self.fail_session_purge.load(Ordering::SeqCst) {
                return Err(outage());
            }
            self.inner.delete_user_sessions(user_id).await
        }
        async fn rotate_session(&self, old_id: Uuid, new_session: &Session) -> StoreResult<()> {
            self.inner.rotate_session(old_id, new_session).await
        }
        async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
            self.inner.delete_expired_sessions(now).await
        }
    }

    #[async_trait]
    impl PasswordResetStore for FlakyStore {
        async fn create_password_reset(&self, reset: &PasswordReset) -> StoreResult<()> {
            self.inner.create_password_reset(reset).await
        }
        async fn get_password_reset_by_token(&self, token: &str) -> StoreResult<PasswordReset> {
            self.inner.get_password_reset_by_token(token).await
        }
        async fn mark_password_reset_used(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
            self.inner.mark_password_reset_used(id, at).await
        }
        async fn consume_password_reset(
            &self,
            id: Uuid,
            user: &User,
            at: DateTime<Utc>,
        ) -> StoreResult<()> {
            if self.fail_consume.load(Ordering::SeqCst) {
                return Err(outage());
            }
            self.inner.consume_password_reset(id, user, at).await
        }
        async fn delete_expired_password_resets(&self, now: DateTime<Utc>) -> StoreResult<u64> {
            self.inner.delete_expired_password_resets(now).await
        }
    }

    fn jwt() -> JwtService {
        JwtService::new(JwtConfig::with_secret("service-test-secret")).unwrap()
    }

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(Argon2Params {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
            salt_length: 16,
            key_length: 32,
        })
    }

    fn service_with(store: Arc<dyn AuthStore>) -> AuthService {
        AuthService::new(store, jwt(), hasher(), Arc::new(LogNotifier))
    }

    fn client() -> ClientInfo {
        ClientInfo::new("unit-test", "127.0.0.1")
    }

    #[tokio::test]
    async fn test_register_defaults_role_and_hashes_password() {
        let service = service_with(Arc::new(InMemoryStore::new()));
        let user = service
            .register("alice@example.com", "Passw0rd!", None)
            .await
            .unwrap();

        assert_eq!(user.role, Role::User);
        assert_ne!(user.password_hash, "Passw0rd!");
        assert!(user.password_hash.starts_with("$argon2id$"));

        let admin = service
            .register("root@example.com", "Passw0rd!", Some(Role::Admin))
            .await
            .unwrap();
        assert_eq!(admin.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let service = service_with(Arc::new(InMemoryStore::new()));
        service
            .register("alice@example.com", "Passw0rd!", None)
            .await
            .unwrap();

        let err = service
            .register("alice@example.com", "Other1234", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UserAlreadyExists));
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let service = service_with(Arc::new(InMemoryStore::new()));
        service
            .register("real@x.com", "Passw0rd!", None)
            .await
            .unwrap();

        let unknown = service
            .login("nonexistent@x.com", "anything", &client())
            .await
            .unwrap_err();
        let wrong = service
            .login("real@x.com", "wrongpassword", &client())
            .await
            .unwrap_err();

        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn test_login_opens_session() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        let user = service
            .register("alice@example.com", "Passw0rd!", None)
            .await
            .unwrap();

        let pair = service
            .login("alice@example.com", "Passw0rd!", &client())
            .await
            .unwrap();
        assert_eq!(pair.expires_in, 900);

        let session = store.get_session_by_token(&pair.refresh_token).await.unwrap();
        assert_eq!(session.user_id, user.id);
        assert_eq!(session.user_agent, "unit-test");
        let lifetime = session.expires_at - session.created_at;
        assert!((lifetime.num_seconds() - 604_800).abs() <= 1);

        let claims = service.validate_access_token(&pair.access_token).unwrap();
        assert_eq!(claims.user_id, user.id);
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_retires_old_token() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        let user = service
            .register("alice@example.com", "Passw0rd!", None)
            .await
            .unwrap();
        let first = service
            .login("alice@example.com", "Passw0rd!", &client())
            .await
            .unwrap();

        let second = service
            .refresh_token(&first.refresh_token, &client())
            .await
            .unwrap();
        assert_ne!(first.refresh_token, second.refresh_token);
        assert_eq!(store.session_count(user.id).await, 1);

        let replay = service
            .refresh_token(&first.refresh_token, &client())
            .await
            .unwrap_err();
        assert!(matches!(replay, AuthError::InvalidSession));

        // The rotated session keeps the refresh lifetime
        let session = store
            .get_session_by_token(&second.refresh_token)
            .await
            .unwrap();
        let lifetime = session.expires_at - session.created_at;
        assert!((lifetime.num_seconds() - 604_800).abs() <= 1);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_has_single_winner() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        let user = service
            .register("alice@example.com", "Passw0rd!", None)
            .await
            .unwrap();
        let pair = service
            .login("alice@example.com", "Passw0rd!", &client())
            .await
            .unwrap();

        let (client_a, client_b) = (client(), client());
        let (a, b) = tokio::join!(
            service.refresh_token(&pair.refresh_token, &client_a),
            service.refresh_token(&pair.refresh_token, &client_b),
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert_eq!(store.session_count(user.id).await, 1);
    }

    #[tokio::test]
    async fn test_refresh_rejects_other_token_kinds() {
        let service = service_with(Arc::new(InMemoryStore::new()));
        service
            .register("alice@example.com", "Passw0rd!", None)
            .await
            .unwrap();
        let pair = service
            .login("alice@example.com", "Passw0rd!", &client())
            .await
            .unwrap();

        let err = service
            .refresh_token(&pair.access_token, &client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::WrongTokenType));

        let err = service.refresh_token("garbage", &client()).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_refresh_with_expired_session_deletes_it() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        let user = service
            .register("alice@example.com", "Passw0rd!", None)
            .await
            .unwrap();

        let token = service
            .jwt()
            .generate_refresh_token(user.id, &user.email, user.role)
            .unwrap();
        let stale = Session::new(
            user.id,
            token.clone(),
            &client(),
            Utc::now() - Duration::minutes(1),
        );
        store.create_session(&stale).await.unwrap();

        let err = service.refresh_token(&token, &client()).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));
        assert_eq!(store.session_count(user.id).await, 0);
    }

    #[tokio::test]
    async fn test_refresh_for_deleted_user() {
        let service = service_with(Arc::new(InMemoryStore::new()));
        let token = service
            .jwt()
            .generate_refresh_token(Uuid::new_v4(), "ghost@example.com", Role::User)
            .unwrap();

        let err = service.refresh_token(&token, &client()).await.unwrap_err();
        assert!(matches!(err, AuthError::UserNotFound));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        let user = service
            .register("alice@example.com", "Passw0rd!", None)
            .await
            .unwrap();
        let pair = service
            .login("alice@example.com", "Passw0rd!", &client())
            .await
            .unwrap();

        service.logout(&pair.refresh_token).await.unwrap();
        service.logout(&pair.refresh_token).await.unwrap();
        service.logout("never-issued").await.unwrap();
        assert_eq!(store.session_count(user.id).await, 0);

        let err = service
            .refresh_token(&pair.refresh_token, &client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidSession));
    }

    #[tokio::test]
    async fn test_logout_all_counts_sessions() {
        let service = service_with(Arc::new(InMemoryStore::new()));
        let user = service
            .register("alice@example.com", "Passw0rd!", None)
            .await
            .unwrap();
        for _ in 0..3 {
            service
                .login("alice@example.com", "Passw0rd!", &client())
                .await
                .unwrap();
        }

        assert_eq!(service.logout_all(user.id).await.unwrap(), 3);
        assert_eq!(service.logout_all(user.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_password_reset_unknown_email() {
        let service = service_with(Arc::new(InMemoryStore::new()));
        let err = service
            .request_password_reset("nobody@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UserNotFound));
    }

    #[tokio::test]
    async fn test_reset_password_is_single_use() {
        let service = service_with(Arc::new(InMemoryStore::new()));
        service
            .register("alice@example.com", "Passw0rd!", None)
            .await
            .unwrap();
        let token = service
            .request_password_reset("alice@example.com")
            .await
            .unwrap();

        let outcome = service.reset_password(&token, "N3wPassw0rd").await.unwrap();
        assert!(outcome.is_clean());

        let err = service
            .reset_password(&token, "An0therOne")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PasswordResetUsed));

        service
            .login("alice@example.com", "N3wPassw0rd", &client())
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_resets_change_password_once() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        service
            .register("alice@example.com", "Passw0rd!", None)
            .await
            .unwrap();
        let token = service
            .request_password_reset("alice@example.com")
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            service.reset_password(&token, "FirstNew1"),
            service.reset_password(&token, "SecondNew2")
        );

        assert_eq!(first.is_ok() as u8 + second.is_ok() as u8, 1);
        let (winning_password, losing_password, loser) = if first.is_ok() {
            ("FirstNew1", "SecondNew2", second)
        } else {
            ("SecondNew2", "FirstNew1", first)
        };
        assert!(matches!(loser, Err(AuthError::PasswordResetUsed)));

        service
            .login("alice@example.com", winning_password, &client())
            .await
            .unwrap();
        let err = service
            .login("alice@example.com", losing_password, &client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_reset_password_store_outage_changes_nothing() {
        let store = Arc::new(FlakyStore::default());
        let service = service_with(store.clone());
        service
            .register("alice@example.com", "Passw0rd!", None)
            .await
            .unwrap();
        let token = service
            .request_password_reset("alice@example.com")
            .await
            .unwrap();

        store.fail_consume.store(true, Ordering::SeqCst);
        let err = service.reset_password(&token, "N3wPassw0rd").await.unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));

        // Neither the password nor the token were spent
        service
            .login("alice@example.com", "Passw0rd!", &client())
            .await
            .unwrap();
        store.fail_consume.store(false, Ordering::SeqCst);
        service.reset_password(&token, "N3wPassw0rd").await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_password_rejects_expired_record() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        let user = service
            .register("alice@example.com", "Passw0rd!", None)
            .await
            .unwrap();

        let token = service
            .jwt()
            .generate_reset_token(user.id, &user.email)
            .unwrap();
        let reset = PasswordReset::new(user.id, token.clone(), Utc::now() - Duration::minutes(1));
        store.create_password_reset(&reset).await.unwrap();

        let err = service.reset_password(&token, "N3wPassw0rd").await.unwrap_err();
        assert!(matches!(err, AuthError::PasswordResetExpired));

        // Password unchanged
        service
            .login("alice@example.com", "Passw0rd!", &client())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reset_password_without_record() {
        let service = service_with(Arc::new(InMemoryStore::new()));
        let user = service
            .register("alice@example.com", "Passw0rd!", None)
            .await
            .unwrap();
        let token = service
            .jwt()
            .generate_reset_token(user.id, &user.email)
            .unwrap();

        let err = service.reset_password(&token, "N3wPassw0rd").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_reset_password_rejects_access_token() {
        let service = service_with(Arc::new(InMemoryStore::new()));
        service
            .register("alice@example.com", "Passw0rd!", None)
            .await
            .unwrap();
        let pair = service
            .login("alice@example.com", "Passw0rd!", &client())
            .await
            .unwrap();

        let err = service
            .reset_password(&pair.access_token, "N3wPassw0rd")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::WrongTokenType));
    }

    #[tokio::test]
    async fn test_reset_password_reports_secondary_failures() {
        let store = Arc::new(FlakyStore::default());
        let service = service_with(store.clone());
        let user = service
            .register("alice@example.com", "Passw0rd!", None)
            .await
            .unwrap();
        service
            .login("alice@example.com", "Passw0rd!", &client())
            .await
            .unwrap();
        let token = service
            .request_password_reset("alice@example.com")
            .await
            .unwrap();

        store.fail_session_purge.store(true, Ordering::SeqCst);

        let outcome = service.reset_password(&token, "N3wPassw0rd").await.unwrap();
        assert_eq!(outcome.warnings, vec![ResetWarning::SessionInvalidationFailed]);

        // The password change itself went through
        service
            .login("alice@example.com", "N3wPassw0rd", &client())
            .await
            .unwrap();
        assert_eq!(store.inner.session_count(user.id).await, 2);
    }

    #[tokio::test]
    async fn test_validate_access_token_keeps_error_kinds() {
        let service = service_with(Arc::new(InMemoryStore::new()));
        let reset = service
            .jwt()
            .generate_reset_token(Uuid::new_v4(), "a@example.com")
            .unwrap();

        assert!(matches!(
            service.validate_access_token(&reset),
            Err(AuthError::WrongTokenType)
        ));
        assert!(matches!(
            service.validate_access_token("nope"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_token_fingerprint_is_short_and_stable() {
        let fp = token_fingerprint("some.jwt.value");
        assert_eq!(fp.len(), 8);
        assert_eq!(fp, token_fingerprint("some.jwt.value"));
        assert_ne!(fp, token_fingerprint("other.jwt.value"));
    }
}
