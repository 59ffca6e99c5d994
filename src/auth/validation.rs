use serde::Deserialize;
use validator::Validate;

use crate::crypto::password::MAX_PASSWORD_BYTES;
use crate::error::AppError;

pub const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

impl LoginRequest {
    pub fn new(email: &str, password: &str) -> Self {
        Self {
            email: email.trim().to_string(),
            password: password.to_string(),
        }
    }

    pub fn check(&self) -> Result<(), AppError> {
        self.validate()?;
        Ok(())
    }
}

/// At least one uppercase letter, one lowercase letter and one digit.
pub fn is_strong_password(password: &str) -> bool {
    password.chars().count() >= MIN_PASSWORD_LENGTH
        && password.chars().any(char::is_uppercase)
        && password.chars().any(char::is_lowercase)
        && password.chars().any(char::is_numeric)
}

impl RegisterRequest {
    pub fn new(email: &str, password: &str) -> Self {
        Self {
            email: email.trim().to_string(),
            password: password.to_string(),
        }
    }

    pub fn check(&self) -> Result<(), AppError> {
        self.validate()?;
        if self.password.len() > MAX_PASSWORD_BYTES {
            return Err(AppError::ValidationError(format!(
                "Password must be at most {} bytes",
                MAX_PASSWORD_BYTES
            )));
        }
        if !is_strong_password(&self.password) {
            return Err(AppError::ValidationError(
                "Password must contain uppercase, lowercase, and number".into(),
            ));
        }
        Ok(())
    }
}
