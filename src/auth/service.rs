use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::auth::jwt::{AccessTokenCodec, Claims};
use crate::auth::mailer::VerificationMailer;
use crate::auth::validation::{LoginRequest, RegisterRequest};
use crate::config::AuthConfig;
use crate::crypto::{generate_token, PasswordHasher, REFRESH_TOKEN_BYTES};
use crate::db::models::{NewRefreshToken, NewUser, RefreshToken, User};
use crate::db::repository::{TokenRepository, UserRepository};
use crate::error::{AppError, AuthError, DatabaseError};

/// Password run through bcrypt when the email is unknown, so that a miss costs
/// as much as a wrong password.
const TIMING_EQUALIZER: &str = "timing-equalizer-password";

#[derive(Debug, Clone)]
pub struct LoginResult {
    pub access_token: String,
    pub refresh_token: String,
    pub user: User,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// The session engine: registration, login, refresh-token rotation, logout.
///
/// Every refresh token belongs to a family started by a login. Rotation revokes
/// the presented token and stores its successor in one store transaction. A
/// revoked token presented again is treated as stolen and its whole family is
/// revoked.
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    tokens: Arc<dyn TokenRepository>,
    hasher: PasswordHasher,
    codec: AccessTokenCodec,
    refresh_ttl: Duration,
    mailer: Option<Arc<dyn VerificationMailer>>,
    /// Digest of [`TIMING_EQUALIZER`], computed once at construction.
    dummy_hash: String,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        tokens: Arc<dyn TokenRepository>,
        config: &AuthConfig,
    ) -> Result<Self, AppError> {
        if config.refresh_token_ttl_secs <= 0 {
            return Err(AppError::ConfigError("refresh token TTL must be positive".into()));
        }
        let codec = AccessTokenCodec::new(
            &config.jwt_secret,
            Duration::seconds(config.access_token_ttl_secs),
        )?;
        let hasher = PasswordHasher::new(config.bcrypt_cost, config.hash_concurrency)?;
        let dummy_hash = hasher.hash_blocking(TIMING_EQUALIZER)?;

        Ok(Self {
            users,
            tokens,
            hasher,
            codec,
            refresh_ttl: Duration::seconds(config.refresh_token_ttl_secs),
            mailer: None,
            dummy_hash,
        })
    }

    /// Leave new accounts unverified and hand them to `mailer`.
    pub fn with_mailer(mut self, mailer: Arc<dyn VerificationMailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    pub fn access_token_ttl(&self) -> Duration {
        self.codec.ttl()
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    #[instrument(skip(self, password))]
    pub async fn register(&self, email: &str, password: &str) -> Result<User, AppError> {
        let request = RegisterRequest::new(email, password);
        request.check()?;

        if self.users.get_by_email(&request.email).await?.is_some() {
            return Err(AuthError::UserAlreadyExists.into());
        }

        let password_hash = self.hasher.hash(&request.password).await?;
        let mut user = self
            .users
            .create(NewUser {
                email: request.email,
                password_hash,
            })
            .await
            .map_err(|e| match e {
                // Lost a race with a concurrent registration of the same email
                AppError::DatabaseError(DatabaseError::Duplicate) => AuthError::UserAlreadyExists.into(),
                other => other,
            })?;

        match &self.mailer {
            Some(mailer) => {
                if let Err(e) = mailer.send_verification(&user).await {
                    warn!(user_id = user.id, error = %e, "verification delivery failed");
                }
            }
            None => {
                self.users.mark_verified(user.id).await?;
                user.verified = true;
            }
        }

        info!(user_id = user.id, verified = user.verified, "user registered");
        Ok(user)
    }

    /// Marks the account verified once its address has been confirmed out of band.
    #[instrument(skip(self))]
    pub async fn mark_verified(&self, user_id: i64) -> Result<User, AppError> {
        if !self.users.mark_verified(user_id).await? {
            return Err(AuthError::UserNotFound.into());
        }
        self.get_user(user_id).await
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResult, AppError> {
        let request = LoginRequest::new(email, password);
        request.check()?;

        let user = match self.users.get_by_email(&request.email).await? {
            Some(user) => user,
            None => {
                self.hasher.verify(&self.dummy_hash, password).await?;
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        if !self.hasher.verify(&user.password_hash, password).await? {
            return Err(AuthError::InvalidCredentials.into());
        }

        if !user.verified {
            return Err(AuthError::NotVerified.into());
        }

        let access_token = self.codec.issue(user.id, &user.email)?;
        let refresh_token = generate_token(REFRESH_TOKEN_BYTES)?;
        let record = self
            .tokens
            .create(NewRefreshToken::new(
                user.id,
                Uuid::new_v4(),
                refresh_token.clone(),
                self.refresh_ttl,
            ))
            .await?;

        info!(user_id = user.id, session_id = record.id, "login succeeded");
        Ok(LoginResult {
            access_token,
            refresh_token,
            user,
        })
    }

    #[instrument(skip_all)]
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        let record = self
            .tokens
            .get_by_token(refresh_token)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        if record.is_revoked() {
            let revoked = self.tokens.revoke_family(record.family_id).await?;
            warn!(
                user_id = record.user_id,
                family_id = %record.family_id,
                revoked,
                "revoked refresh token presented again, revoking its family"
            );
            return Err(AuthError::InvalidToken.into());
        }

        if !record.is_valid() {
            return Err(AuthError::InvalidToken.into());
        }

        let user = match self.users.get_by_id(record.user_id).await? {
            Some(user) => user,
            None => {
                warn!(user_id = record.user_id, "refresh token owner no longer exists");
                return Err(AuthError::InvalidToken.into());
            }
        };

        let access_token = self.codec.issue(user.id, &user.email)?;
        let next_token = generate_token(REFRESH_TOKEN_BYTES)?;
        let replacement = NewRefreshToken::new(
            user.id,
            record.family_id,
            next_token.clone(),
            self.refresh_ttl,
        );

        match self.tokens.rotate(refresh_token, replacement).await? {
            Some(rotated) => {
                debug!(user_id = user.id, session_id = rotated.id, "refresh token rotated");
                Ok(TokenPair {
                    access_token,
                    refresh_token: next_token,
                })
            }
            None => {
                debug!(user_id = user.id, "refresh token consumed by a concurrent rotation");
                Err(AuthError::InvalidToken.into())
            }
        }
    }

    /// Revokes the session. Unknown or already revoked tokens are not an error.
    #[instrument(skip_all)]
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AppError> {
        let revoked = self.tokens.revoke(refresh_token).await?;
        debug!(revoked, "logout");
        Ok(())
    }

    /// Revokes every active session of the user. Returns how many were revoked.
    #[instrument(skip(self))]
    pub async fn logout_all(&self, user_id: i64) -> Result<u64, AppError> {
        let revoked = self.tokens.revoke_all_for_user(user_id).await?;
        info!(user_id, revoked, "all sessions revoked");
        Ok(revoked)
    }

    pub async fn active_sessions(&self, user_id: i64) -> Result<Vec<RefreshToken>, AppError> {
        let now = chrono::Utc::now();
        let mut sessions = self.tokens.get_by_user_id(user_id).await?;
        sessions.retain(|token| token.is_valid_at(now));
        Ok(sessions)
    }

    pub fn validate_access_token(&self, token: &str) -> Result<Claims, AppError> {
        self.codec.validate(token)
    }

    pub async fn get_user(&self, user_id: i64) -> Result<User, AppError> {
        self.users
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::UserNotFound.into())
    }

    /// Deletes expired refresh tokens.
    pub async fn purge_expired(&self) -> Result<u64, AppError> {
        self.tokens.delete_expired().await
    }
}
