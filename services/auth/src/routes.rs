//! Authentication service routes

use axum::{
    Json, Router,
    extract::{ConnectInfo, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::USER_AGENT},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::{
    AppState,
    error::ApiError,
    middleware::{AuthenticatedUser, auth_required, rate_limit, require_role},
    models::{ClientInfo, LoginCredentials, Role},
    rate_limiter::client_ip,
    service::AuthError,
    validation::{FieldError, validate_email, validate_password, validate_registration},
};

/// Generic answer to every reset request, whether or not the account exists
pub const RESET_REQUESTED_MESSAGE: &str =
    "If an account exists for this email, password reset instructions have been sent";

/// Request for user registration
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// Request carrying a refresh token
#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

/// Request for a password reset email
#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

/// Request to change a password with a reset token
#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

/// Create the router for the authentication service
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    let public = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh-token", post(refresh_token))
        .route("/logout", post(logout))
        .route("/request-password-reset", post(request_password_reset))
        .route("/reset-password", post(reset_password))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    let admin = Router::new()
        .route("/admin/users", get(admin_users))
        .route_layer(middleware::from_fn_with_state(Role::Admin, require_role));

    let authenticated = Router::new()
        .route("/logout-all", post(logout_all))
        .route("/user/profile", get(profile))
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_required));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", public.merge(authenticated))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn client_info(headers: &HeaderMap, peer: Option<ConnectInfo<SocketAddr>>) -> ClientInfo {
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    ClientInfo::new(user_agent, client_ip(headers, peer.map(|ConnectInfo(addr)| addr)))
}

fn field_error(field: &'static str, result: Result<(), String>) -> Result<(), ApiError> {
    result.map_err(|message| ApiError::validation(vec![FieldError { field, message }]))
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "auth-service"
    }))
}

/// User registration endpoint
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;

    let role = validate_registration(&payload.email, &payload.password, payload.role.as_deref())
        .map_err(ApiError::validation)?;

    let user = state
        .auth_service
        .register(&payload.email, &payload.password, role)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "User registered successfully",
            "user_id": user.id,
        })),
    ))
}

/// User login endpoint
pub async fn login(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<LoginCredentials>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(credentials) = payload?;
    let client = client_info(&headers, peer);

    let pair = state
        .auth_service
        .login(&credentials.email, &credentials.password, &client)
        .await?;

    Ok(Json(pair))
}

/// Refresh token endpoint
pub async fn refresh_token(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<RefreshTokenRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    let client = client_info(&headers, peer);

    let pair = state
        .auth_service
        .refresh_token(&payload.refresh_token, &client)
        .await?;

    Ok(Json(pair))
}

/// Logout endpoint
pub async fn logout(
    State(state): State<AppState>,
    payload: Result<Json<RefreshTokenRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    state.auth_service.logout(&payload.refresh_token).await?;

    Ok(Json(serde_json::json!({"message": "Logged out successfully"})))
}

/// Revoke every session of the caller
pub async fn logout_all(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    let revoked = state.auth_service.logout_all(user.user_id).await?;

    Ok(Json(serde_json::json!({
        "message": "Logged out from all sessions",
        "sessions_revoked": revoked,
    })))
}

/// Password reset request endpoint
pub async fn request_password_reset(
    State(state): State<AppState>,
    payload: Result<Json<PasswordResetRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    field_error("email", validate_email(&payload.email))?;

    // Issuance and delivery run off the request path so response timing
    // does not depend on whether the account exists
    let service = state.auth_service.clone();
    tokio::spawn(async move {
        match service.request_password_reset(&payload.email).await {
            Ok(_) => info!("Password reset requested"),
            Err(AuthError::UserNotFound) => info!("Password reset requested for unknown email"),
            Err(e) => error!("Password reset request failed: {}", e),
        }
    });

    Ok(Json(serde_json::json!({"message": RESET_REQUESTED_MESSAGE})))
}

/// Password change endpoint
pub async fn reset_password(
    State(state): State<AppState>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    field_error("new_password", validate_password(&payload.new_password))?;

    let outcome = state
        .auth_service
        .reset_password(&payload.token, &payload.new_password)
        .await?;

    Ok(Json(serde_json::json!({
        "message": "Password has been reset successfully",
        "warnings": outcome.warnings,
    })))
}

/// Profile of the authenticated user
pub async fn profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.auth_service.get_user(user.user_id).await?;

    Ok(Json(serde_json::json!({
        "user_id": user.id,
        "email": user.email,
        "role": user.role,
        "created_at": user.created_at,
    })))
}

/// Admin-only endpoint
pub async fn admin_users(user: AuthenticatedUser) -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Admin access granted",
        "admin_id": user.user_id,
        "email": user.email,
    }))
}
