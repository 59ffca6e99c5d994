//! Storage boundary for users and refresh tokens.
//!
//! The auth engine talks to persistence only through these traits. Implementations
//! own durability and atomicity; the engine owns every policy decision.

use async_trait::async_trait;
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

use crate::db::models::{NewRefreshToken, NewUser, RefreshToken, User};
use crate::error::AppError;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `DatabaseError::Duplicate` when the email is taken.
    async fn create(&self, user: NewUser) -> Result<User, AppError>;

    async fn get_by_id(&self, id: i64) -> Result<Option<User>, AppError>;

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    /// Returns false when no such user exists.
    async fn mark_verified(&self, id: i64) -> Result<bool, AppError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn create(&self, token: NewRefreshToken) -> Result<RefreshToken, AppError>;

    async fn get_by_token(&self, token: &str) -> Result<Option<RefreshToken>, AppError>;

    /// Non-revoked tokens of the user, newest first.
    async fn get_by_user_id(&self, user_id: i64) -> Result<Vec<RefreshToken>, AppError>;

    /// Revokes the token if it is not already revoked. True only for the call that revoked it.
    async fn revoke(&self, token: &str) -> Result<bool, AppError>;

    async fn revoke_all_for_user(&self, user_id: i64) -> Result<u64, AppError>;

    async fn revoke_family(&self, family_id: Uuid) -> Result<u64, AppError>;

    /// Revokes `old_token` and stores `replacement` as one atomic unit.
    ///
    /// Returns `None`, with nothing written, when `old_token` was no longer active
    /// (revoked, expired or unknown) at the moment of the update.
    async fn rotate(
        &self,
        old_token: &str,
        replacement: NewRefreshToken,
    ) -> Result<Option<RefreshToken>, AppError>;

    /// Physically removes expired tokens. Returns the number removed.
    async fn delete_expired(&self) -> Result<u64, AppError>;
}
