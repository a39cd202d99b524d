//! Input validation utilities

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::models::Role;

const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_PASSWORD_LENGTH: usize = 100;

/// A rejected request field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Validate email
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email must be at most 254 characters long".to_string());
    }

    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    });

    if !regex.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Validate password length, counted in characters
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }

    let length = password.chars().count();

    if length < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LENGTH
        ));
    }

    if length > MAX_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at most {} characters long",
            MAX_PASSWORD_LENGTH
        ));
    }

    Ok(())
}

/// Validate an optional role name
pub fn validate_role(role: Option<&str>) -> Result<Option<Role>, String> {
    match role {
        None | Some("") => Ok(None),
        Some(name) => name
            .parse::<Role>()
            .map(Some)
            .map_err(|_| "Role must be one of: user, admin".to_string()),
    }
}

/// Validate a registration form, collecting every failing field
pub fn validate_registration(
    email: &str,
    password: &str,
    role: Option<&str>,
) -> Result<Option<Role>, Vec<FieldError>> {
    let mut errors = Vec::new();

    if let Err(message) = validate_email(email) {
        errors.push(FieldError {
            field: "email",
            message,
        });
    }
    if let Err(message) = validate_password(password) {
        errors.push(FieldError {
            field: "password",
            message,
        });
    }
    let role = match validate_role(role) {
        Ok(role) => role,
        Err(message) => {
            errors.push(FieldError {
                field: "role",
                message,
            });
            None
        }
    };

    if errors.is_empty() {
        Ok(role)
    } else {
        Err(errors)
    }
}
