//! Common library for the CV builder backend
//!
//! This crate provides the shared infrastructure used by the services of the
//! CV builder backend: PostgreSQL pooling, the Redis client used for rate
//! limiting, and the database error types.
//!
//! ```rust,no_run
//! use cv_common::database::{DatabaseConfig, init_pool, health_check};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DatabaseConfig::from_env()?;
//!     let pool = init_pool(&config).await?;
//!     let is_healthy = health_check(&pool).await?;
//!     println!("Database health check: {}", is_healthy);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod database;
pub mod error;
