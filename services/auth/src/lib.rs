//! Authentication core of the CV builder backend
//!
//! Password hashing, typed JWTs, refresh-token sessions, password resets,
//! a sliding-window rate limiter and the axum surface that exposes them.

pub mod cleanup;
pub mod config;
pub mod error;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod rate_limiter;
pub mod repositories;
pub mod routes;
pub mod service;
pub mod validation;

use crate::{rate_limiter::RateLimiter, service::AuthService};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub auth_service: AuthService,
    pub rate_limiter: RateLimiter,
}
