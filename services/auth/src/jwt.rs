//! JWT service for token generation and validation
//!
//! Access, refresh and password-reset tokens share one claims shape and one
//! HS256 secret. Only the `token_type` tag and the lifetime differ, and every
//! validation checks the tag separately from the signature and time claims.

use anyhow::Result;
use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

use crate::models::Role;

/// JWT configuration
#[derive(Clone)]
pub struct JwtConfig {
    /// Shared HMAC secret
    pub secret: String,
    /// `iss` claim written and required on every token
    pub issuer: String,
    /// `aud` claim written and required on every token
    pub audience: String,
    /// Access token expiration time in seconds (default: 15 minutes)
    pub access_token_expiry: u64,
    /// Refresh token expiration time in seconds (default: 7 days)
    pub refresh_token_expiry: u64,
    /// Password reset token expiration time in seconds (default: 1 hour)
    pub reset_token_expiry: u64,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_token_expiry", &self.access_token_expiry)
            .field("refresh_token_expiry", &self.refresh_token_expiry)
            .field("reset_token_expiry", &self.reset_token_expiry)
            .finish()
    }
}

impl JwtConfig {
    /// Configuration with the default issuer, audience and lifetimes
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            issuer: "resume_generator".to_string(),
            audience: "resume_generator_users".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 604_800,
            reset_token_expiry: 3_600,
        }
    }

    /// Create a new JwtConfig from environment variables
    ///
    /// # Environment Variables
    /// - `JWT_SECRET`: HMAC signing secret (required)
    /// - `JWT_ISSUER`: Token issuer (default: "resume_generator")
    /// - `JWT_AUDIENCE`: Token audience (default: "resume_generator_users")
    /// - `JWT_ACCESS_TOKEN_EXPIRY`: Access token expiry in seconds (default: 900)
    /// - `JWT_REFRESH_TOKEN_EXPIRY`: Refresh token expiry in seconds (default: 604800)
    /// - `JWT_RESET_TOKEN_EXPIRY`: Reset token expiry in seconds (default: 3600)
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable not set"))?;

        if secret.trim().is_empty() {
            anyhow::bail!("JWT_SECRET must not be empty");
        }

        let mut config = Self::with_secret(secret);

        if let Ok(issuer) = std::env::var("JWT_ISSUER") {
            config.issuer = issuer;
        }
        if let Ok(audience) = std::env::var("JWT_AUDIENCE") {
            config.audience = audience;
        }

        config.access_token_expiry = std::env::var("JWT_ACCESS_TOKEN_EXPIRY")
            .unwrap_or_else(|_| "900".to_string()) // 15 minutes
            .parse()
            .unwrap_or(900);

        config.refresh_token_expiry = std::env::var("JWT_REFRESH_TOKEN_EXPIRY")
            .unwrap_or_else(|_| "604800".to_string()) // 7 days
            .parse()
            .unwrap_or(604_800);

        config.reset_token_expiry = std::env::var("JWT_RESET_TOKEN_EXPIRY")
            .unwrap_or_else(|_| "3600".to_string()) // 1 hour
            .parse()
            .unwrap_or(3_600);

        Ok(config)
    }
}

/// Token type tag
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Short-lived credential for API calls
    Access,
    /// Long-lived credential exchanged for a new pair, backed by a session row
    Refresh,
    /// Single-purpose credential for one password change
    Reset,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Access => f.write_str("access"),
            TokenType::Refresh => f.write_str("refresh"),
            TokenType::Reset => f.write_str("reset"),
        }
    }
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// User ID
    pub user_id: Uuid,
    /// User email at issuance
    pub email: String,
    /// User role at issuance
    pub role: Role,
    /// Token type tag
    pub token_type: TokenType,
    /// Issuer
    pub iss: String,
    /// Subject (the user ID)
    pub sub: String,
    /// Audience
    pub aud: String,
    /// Expiration time
    pub exp: i64,
    /// Not before
    pub nbf: i64,
    /// Issued at time
    pub iat: i64,
    /// Unique token ID
    pub jti: Uuid,
}

/// Token validation and issuance failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Signature and format were fine but `exp` has passed
    #[error("token expired")]
    Expired,
    /// Bad signature, malformed token, or wrong issuer/audience/nbf
    #[error("invalid token")]
    Invalid,
    /// Cryptographically valid token of another kind
    #[error("wrong token type: expected {expected}, got {actual}")]
    WrongType {
        expected: TokenType,
        actual: TokenType,
    },
    /// Token could not be signed
    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// JWT service
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    config: JwtConfig,
}

impl JwtService {
    /// Initialize a new JWT service
    pub fn new(config: JwtConfig) -> Result<Self> {
        if config.secret.is_empty() {
            anyhow::bail!("JWT secret is required");
        }

        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = 0;
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iat", "iss", "aud", "sub"]);

        Ok(JwtService {
            encoding_key,
            decoding_key,
            validation,
            config,
        })
    }

    /// Generate an access token for a user
    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        email: &str,
        role: Role,
    ) -> Result<String, TokenError> {
        self.generate_token(
            user_id,
            email,
            role,
            TokenType::Access,
            self.config.access_token_expiry,
        )
    }

    /// Generate a refresh token for a user
    pub fn generate_refresh_token(
        &self,
        user_id: Uuid,
        email: &str,
        role: Role,
    ) -> Result<String, TokenError> {
        self.generate_token(
            user_id,
            email,
            role,
            TokenType::Refresh,
            self.config.refresh_token_expiry,
        )
    }

    /// Generate a password reset token for a user
    ///
    /// Reset tokens carry the default role; they never authorize anything but
    /// the password change.
    pub fn generate_reset_token(&self, user_id: Uuid, email: &str) -> Result<String, TokenError> {
        self.generate_token(
            user_id,
            email,
            Role::default(),
            TokenType::Reset,
            self.config.reset_token_expiry,
        )
    }

    fn generate_token(
        &self,
        user_id: Uuid,
        email: &str,
        role: Role,
        token_type: TokenType,
        expiry_seconds: u64,
    ) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let lifetime = i64::try_from(expiry_seconds).unwrap_or(i64::MAX);

        let claims = Claims {
            user_id,
            email: email.to_string(),
            role,
            token_type,
            iss: self.config.issuer.clone(),
            sub: user_id.to_string(),
            aud: self.config.audience.clone(),
            exp: now.saturating_add(lifetime),
            nbf: now,
            iat: now,
            jti: Uuid::new_v4(),
        };

        self.sign(&claims)
    }

    fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key).map_err(|e| {
            error!("Failed to sign JWT token: {}", e);
            TokenError::Signing(e.to_string())
        })
    }

    /// Validate an access token
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_token(token, TokenType::Access)
    }

    /// Validate a refresh token
    pub fn validate_refresh_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_token(token, TokenType::Refresh)
    }

    /// Validate a password reset token
    pub fn validate_reset_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_token(token, TokenType::Reset)
    }

    fn validate_token(&self, token: &str, expected: TokenType) -> Result<Claims, TokenError> {
        let claims = self.decode_claims(token)?;

        if claims.token_type != expected {
            debug!(
                "Rejecting {} token where {} was required",
                claims.token_type, expected
            );
            return Err(TokenError::WrongType {
                expected,
                actual: claims.token_type,
            });
        }

        Ok(claims)
    }

    /// Check signature, issuer, audience and time claims, without the type check
    fn decode_claims(&self, token: &str) -> Result<Claims, TokenError> {
        let token_data =
            decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
                match e.kind() {
                    ErrorKind::ExpiredSignature => TokenError::Expired,
                    _ => {
                        debug!("Token validation failed: {}", e);
                        TokenError::Invalid
                    }
                }
            })?;

        let claims = token_data.claims;
        if claims.sub != claims.user_id.to_string() {
            debug!("Token subject does not match its user id");
            return Err(TokenError::Invalid);
        }

        Ok(claims)
    }

    /// Get the access token expiry time
    pub fn access_token_expiry(&self) -> u64 {
        self.config.access_token_expiry
    }

    /// Get the refresh token expiry time
    pub fn refresh_token_expiry(&self) -> u64 {
        self.config.refresh_token_expiry
    }

    /// Get the password reset token expiry time
    pub fn reset_token_expiry(&self) -> u64 {
        self.config.reset_token_expiry
    }
}
