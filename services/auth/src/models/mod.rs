//! Authentication service models

pub mod password_reset;
pub mod role;
pub mod session;
pub mod user;

// Re-export for convenience
pub use password_reset::PasswordReset;
pub use role::{Role, UnknownRole};
pub use session::{ClientInfo, Session};
pub use user::{LoginCredentials, User};
