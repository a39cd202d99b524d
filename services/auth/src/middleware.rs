//! Middleware for bearer authentication, role gating and rate limiting

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{HeaderMap, HeaderValue, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use std::net::SocketAddr;
use tracing::debug;
use uuid::Uuid;

use crate::{
    AppState,
    error::ApiError,
    models::Role,
    rate_limiter::{RateLimitError, client_ip, rate_limit_key},
};

/// Identity of the caller, attached by [`auth_required`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| ApiError::unauthorized("Malformed Authorization header"))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::unauthorized("Authorization header must use the Bearer scheme"))?;

    if token.is_empty() || token.contains(char::is_whitespace) {
        return Err(ApiError::unauthorized("Malformed Authorization header"));
    }

    Ok(token)
}

/// Require a valid access token and attach the caller's identity
pub async fn auth_required(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers())?;

    let claims = state.auth_service.validate_access_token(token).map_err(|e| {
        debug!("Rejected access token: {}", e);
        ApiError::from(e)
    })?;

    req.extensions_mut().insert(AuthenticatedUser {
        user_id: claims.user_id,
        email: claims.email,
        role: claims.role,
    });

    Ok(next.run(req).await)
}

/// Allow only callers holding `required`; layer inside [`auth_required`]
///
/// ```ignore
/// route_layer(middleware::from_fn_with_state(Role::Admin, require_role))
/// ```
pub async fn require_role(
    State(required): State<Role>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = req
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if user.role != required {
        debug!("User {} lacks role {}", user.user_id, required);
        return Err(ApiError::forbidden());
    }

    Ok(next.run(req).await)
}

/// Count the request against the (client IP, path) window
pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(req.headers(), peer);
    let key = rate_limit_key(&ip, req.uri().path());

    let count = match state.rate_limiter.check_rate_limit(&key).await {
        Ok(count) => count,
        Err(RateLimitError::Exceeded {
            current,
            retry_after_secs,
        }) => {
            debug!("Rate limit hit by {} ({} requests)", ip, current);
            return Err(ApiError::rate_limited(retry_after_secs));
        }
    };

    let config = state.rate_limiter.config();
    // A zero count means the limiter failed open and counted nothing
    let remaining = config.max_requests.saturating_sub(count);
    let reset_at = Utc::now().timestamp().max(0) as u64 + config.window_seconds;

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(config.max_requests));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(reset_at));

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::StatusCode, middleware, routing::get};
    use tower::ServiceExt;

    fn headers_with(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(&headers_with("Bearer abc.def.ghi")).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn test_malformed_authorization_headers() {
        assert!(bearer_token(&HeaderMap::new()).is_err());
        for value in [
            "abc.def.ghi",
            "Bearer",
            "Bearer ",
            "bearer abc",
            "Basic dXNlcjpwYXNz",
            "Bearer abc def",
            "Bearer  abc",
        ] {
            let err = bearer_token(&headers_with(value)).unwrap_err();
            assert_eq!(err.code(), "UNAUTHORIZED", "accepted {:?}", value);
        }
    }

    fn admin_only() -> Router {
        Router::new()
            .route("/admin", get(|| async { "ok" }))
            .route_layer(middleware::from_fn_with_state(Role::Admin, require_role))
    }

    fn request_as(user: Option<AuthenticatedUser>) -> Request {
        let mut req = Request::builder().uri("/admin").body(Body::empty()).unwrap();
        if let Some(user) = user {
            req.extensions_mut().insert(user);
        }
        req
    }

    fn caller(role: Role) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: Uuid::new_v4(),
            email: "caller@example.com".to_string(),
            role,
        }
    }

    #[tokio::test]
    async fn test_require_role_without_identity_is_unauthorized() {
        let response = admin_only().oneshot(request_as(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_require_role_checks_the_attached_role() {
        let response = admin_only()
            .oneshot(request_as(Some(caller(Role::User))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = admin_only()
            .oneshot(request_as(Some(caller(Role::Admin))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
