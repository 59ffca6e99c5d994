use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::models::{NewRefreshToken, NewUser, RefreshToken, User};
use crate::db::repository::{TokenRepository, UserRepository};
use crate::error::{AppError, DatabaseError};

const USER_COLUMNS: &str = "id, email, password_hash, verified, created_at, updated_at";
const TOKEN_COLUMNS: &str = "id, user_id, family_id, token, expires_at, created_at, revoked_at";

/// PostgreSQL implementation of the user and refresh-token repositories.
#[derive(Clone)]
pub struct DbOperations {
    pool: Arc<PgPool>,
}

impl DbOperations {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn new_with_options(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| AppError::DatabaseError(DatabaseError::ConnectionError(e.to_string())))?;

        Ok(Self { pool: Arc::new(pool) })
    }

    pub fn pool(&self) -> &PgPool {
        self.pool.as_ref()
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations").run(self.pool.as_ref()).await?;
        Ok(())
    }

    pub async fn begin_transaction(&self) -> Result<Transaction<'_, Postgres>, AppError> {
        Ok(self.pool.as_ref().begin().await?)
    }

    async fn insert_token(
        token: &NewRefreshToken,
        transaction: &mut Transaction<'_, Postgres>,
    ) -> Result<RefreshToken, AppError> {
        let query = format!(
            "INSERT INTO refresh_tokens (user_id, family_id, token, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            TOKEN_COLUMNS
        );
        let created = sqlx::query_as::<_, RefreshToken>(&query)
            .bind(token.user_id)
            .bind(token.family_id)
            .bind(&token.token)
            .bind(token.expires_at)
            .bind(Utc::now())
            .fetch_one(&mut **transaction)
            .await?;

        Ok(created)
    }
}

#[async_trait]
impl UserRepository for DbOperations {
    async fn create(&self, user: NewUser) -> Result<User, AppError> {
        let now = Utc::now();
        let query = format!(
            "INSERT INTO users (email, password_hash, verified, created_at, updated_at) \
             VALUES ($1, $2, FALSE, $3, $3) RETURNING {}",
            USER_COLUMNS
        );
        let user = sqlx::query_as::<_, User>(&query)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(now)
            .fetch_one(self.pool.as_ref())
            .await?;

        Ok(user)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        let query = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let user = sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(user)
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let query = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);
        let user = sqlx::query_as::<_, User>(&query)
            .bind(email)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(user)
    }

    async fn mark_verified(&self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE users SET verified = TRUE, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TokenRepository for DbOperations {
    async fn create(&self, token: NewRefreshToken) -> Result<RefreshToken, AppError> {
        let mut transaction = self.begin_transaction().await?;
        let created = Self::insert_token(&token, &mut transaction).await?;
        transaction.commit().await?;
        Ok(created)
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<RefreshToken>, AppError> {
        let query = format!("SELECT {} FROM refresh_tokens WHERE token = $1", TOKEN_COLUMNS);
        let token = sqlx::query_as::<_, RefreshToken>(&query)
            .bind(token)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(token)
    }

    async fn get_by_user_id(&self, user_id: i64) -> Result<Vec<RefreshToken>, AppError> {
        let query = format!(
            "SELECT {} FROM refresh_tokens WHERE user_id = $1 AND revoked_at IS NULL \
             ORDER BY created_at DESC, id DESC",
            TOKEN_COLUMNS
        );
        let tokens = sqlx::query_as::<_, RefreshToken>(&query)
            .bind(user_id)
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(tokens)
    }

    async fn revoke(&self, token: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $2 WHERE token = $1 AND revoked_at IS NULL",
        )
        .bind(token)
        .bind(Utc::now())
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_for_user(&self, user_id: i64) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $2 WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .bind(Utc::now())
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }

    async fn revoke_family(&self, family_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $2 WHERE family_id = $1 AND revoked_at IS NULL",
        )
        .bind(family_id)
        .bind(Utc::now())
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }

    async fn rotate(
        &self,
        old_token: &str,
        replacement: NewRefreshToken,
    ) -> Result<Option<RefreshToken>, AppError> {
        let mut transaction = self.begin_transaction().await?;
        let now = Utc::now();

        // The row lock taken by this update serializes concurrent rotations of the same token.
        let revoked = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $2 \
             WHERE token = $1 AND revoked_at IS NULL AND expires_at > $2",
        )
        .bind(old_token)
        .bind(now)
        .execute(&mut *transaction)
        .await?;

        if revoked.rows_affected() != 1 {
            transaction.rollback().await?;
            return Ok(None);
        }

        match Self::insert_token(&replacement, &mut transaction).await {
            Ok(created) => {
                transaction.commit().await?;
                Ok(Some(created))
            }
            Err(e) => {
                transaction.rollback().await?;
                Err(e)
            }
        }
    }

    async fn delete_expired(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1")
            .bind(Utc::now())
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected())
    }
}
