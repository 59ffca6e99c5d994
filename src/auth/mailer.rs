use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::db::models::User;
use crate::error::AppError;

/// Out-of-band delivery of email verification.
///
/// When an [`AuthService`](super::AuthService) has a mailer, new accounts stay
/// unverified and are handed to it; whatever confirms the address later calls
/// `AuthService::mark_verified`. Without one, registration verifies immediately.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VerificationMailer: Send + Sync {
    async fn send_verification(&self, user: &User) -> Result<(), AppError>;
}
