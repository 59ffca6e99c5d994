use bcrypt::BcryptError;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::AppError;

/// Lowest cost bcrypt accepts.
pub const MIN_COST: u32 = 4;
/// Highest cost bcrypt accepts.
pub const MAX_COST: u32 = 31;
/// Longest password bcrypt hashes without truncation. Its 72-byte input block
/// includes a trailing NUL.
pub const MAX_PASSWORD_BYTES: usize = 71;

/// Salted bcrypt hashing run on the blocking pool.
///
/// Every hash or verify holds a permit from a shared semaphore while it runs, so a
/// burst of logins queues up here instead of occupying every blocking thread.
/// Verification reads the cost out of the digest, so raising `cost` leaves older
/// digests verifiable. Passwords longer than [`MAX_PASSWORD_BYTES`] are refused
/// instead of being silently truncated.
#[derive(Clone)]
pub struct PasswordHasher {
    cost: u32,
    permits: Arc<Semaphore>,
}

impl PasswordHasher {
    pub fn new(cost: u32, max_concurrent: usize) -> Result<Self, AppError> {
        if !(MIN_COST..=MAX_COST).contains(&cost) {
            return Err(AppError::ConfigError(format!(
                "bcrypt cost {} outside {}..={}",
                cost, MIN_COST, MAX_COST
            )));
        }
        if max_concurrent == 0 {
            return Err(AppError::ConfigError("hash concurrency must be at least 1".into()));
        }
        Ok(Self {
            cost,
            permits: Arc::new(Semaphore::new(max_concurrent)),
        })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub async fn hash(&self, password: &str) -> Result<String, AppError> {
        let _permit = self.acquire().await?;
        let hasher = self.clone();
        let password = password.to_owned();

        tokio::task::spawn_blocking(move || hasher.hash_blocking(&password))
            .await
            .map_err(|e| AppError::InternalError(format!("Hashing task failed: {}", e)))?
    }

    /// Hashes on the calling thread. Meant for startup work outside the request path.
    pub fn hash_blocking(&self, password: &str) -> Result<String, AppError> {
        bcrypt::non_truncating_hash(password, self.cost).map_err(|e| match e {
            BcryptError::Truncation(_) => AppError::ValidationError(format!(
                "Password must be at most {} bytes",
                MAX_PASSWORD_BYTES
            )),
            other => AppError::InternalError(format!("Failed to hash password: {}", other)),
        })
    }

    /// `Ok(false)` on mismatch, including passwords too long to have been hashed.
    /// Only a malformed digest or a crashed task is an error.
    pub async fn verify(&self, digest: &str, password: &str) -> Result<bool, AppError> {
        let _permit = self.acquire().await?;
        let password = password.to_owned();
        let digest = digest.to_owned();

        let verified = tokio::task::spawn_blocking(move || bcrypt::non_truncating_verify(password, &digest))
            .await
            .map_err(|e| AppError::InternalError(format!("Verification task failed: {}", e)))?;

        match verified {
            Ok(matches) => Ok(matches),
            Err(BcryptError::Truncation(_)) => Ok(false),
            Err(e) => Err(AppError::InternalError(format!("Failed to verify password: {}", e))),
        }
    }

    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>, AppError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| AppError::InternalError("Password hasher is shut down".into()))
    }
}
