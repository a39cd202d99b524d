//! HTTP error responses
//!
//! Every failure leaves the service as `{"error": .., "code": .., "details": ..}`
//! with a stable machine-readable code.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::service::AuthError;
use crate::validation::FieldError;

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a Value>,
}

/// Error returned by handlers and middleware
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<Value>,
    retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
            retry_after: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Request body did not pass field validation
    pub fn validation(errors: Vec<FieldError>) -> Self {
        let details = errors
            .into_iter()
            .map(|e| (e.field.to_string(), Value::String(e.message)))
            .collect::<serde_json::Map<_, _>>();
        Self::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "Validation failed",
        )
        .with_details(Value::Object(details))
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", "Forbidden")
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        let mut err = Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMIT_EXCEEDED",
            "Too many requests, please try again later",
        )
        .with_details(serde_json::json!({ "retry_after": retry_after_secs }));
        err.retry_after = Some(retry_after_secs);
        err
    }

    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "Internal server error",
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => Self::new(
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                "Invalid email or password",
            ),
            AuthError::UserAlreadyExists => Self::new(
                StatusCode::CONFLICT,
                "USER_EXISTS",
                "A user with this email already exists",
            ),
            AuthError::UserNotFound => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", "User not found")
            }
            AuthError::InvalidToken => {
                Self::new(StatusCode::UNAUTHORIZED, "INVALID_TOKEN", "Invalid token")
            }
            AuthError::TokenExpired => {
                Self::new(StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED", "Token expired")
            }
            AuthError::WrongTokenType => Self::new(
                StatusCode::UNAUTHORIZED,
                "WRONG_TOKEN_TYPE",
                "Token cannot be used for this operation",
            ),
            AuthError::InvalidSession => Self::new(
                StatusCode::UNAUTHORIZED,
                "INVALID_SESSION",
                "Session is no longer valid",
            ),
            AuthError::PasswordResetExpired => Self::new(
                StatusCode::BAD_REQUEST,
                "RESET_EXPIRED",
                "Password reset request has expired",
            ),
            AuthError::PasswordResetUsed => Self::new(
                StatusCode::BAD_REQUEST,
                "TOKEN_USED",
                "Password reset token has already been used",
            ),
            AuthError::Internal(e) => {
                error!("Internal error: {:#}", e);
                Self::internal()
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: &self.message,
            code: self.code,
            details: self.details.as_ref(),
        });

        let mut response = (self.status, body).into_response();
        if let Some(secs) = self.retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
