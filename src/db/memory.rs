use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::models::{NewRefreshToken, NewUser, RefreshToken, User};
use crate::db::repository::{TokenRepository, UserRepository};
use crate::error::{AppError, DatabaseError};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<i64, User>,
    tokens: HashMap<String, RefreshToken>,
    next_user_id: i64,
    next_token_id: i64,
}

impl Tables {
    fn insert_token(&mut self, token: NewRefreshToken) -> Result<RefreshToken, AppError> {
        if self.tokens.contains_key(&token.token) {
            return Err(AppError::DatabaseError(DatabaseError::Duplicate));
        }
        self.next_token_id += 1;
        let record = RefreshToken {
            id: self.next_token_id,
            user_id: token.user_id,
            family_id: token.family_id,
            token: token.token,
            expires_at: token.expires_at,
            created_at: Utc::now(),
            revoked_at: None,
        };
        self.tokens.insert(record.token.clone(), record.clone());
        Ok(record)
    }

    fn revoke_where(&mut self, matches: impl Fn(&RefreshToken) -> bool) -> u64 {
        let now = Utc::now();
        let mut revoked = 0;
        for token in self.tokens.values_mut() {
            if token.revoked_at.is_none() && matches(token) {
                token.revoked_at = Some(now);
                revoked += 1;
            }
        }
        revoked
    }
}

/// Process-local store backing both repositories.
///
/// One lock guards both tables, so every operation, `rotate` included, is atomic.
/// Deleting a user also deletes their tokens, like the foreign key cascade in SQL.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes a user and their tokens. Account deletion lives outside the auth engine,
    /// so this is not part of [`UserRepository`].
    pub async fn delete_user(&self, id: i64) -> bool {
        let mut tables = self.tables.write().await;
        tables.tokens.retain(|_, token| token.user_id != id);
        tables.users.remove(&id).is_some()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create(&self, user: NewUser) -> Result<User, AppError> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|existing| existing.email == user.email) {
            return Err(AppError::DatabaseError(DatabaseError::Duplicate));
        }

        tables.next_user_id += 1;
        let now = Utc::now();
        let record = User {
            id: tables.next_user_id,
            email: user.email,
            password_hash: user.password_hash,
            verified: false,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|user| user.email == email).cloned())
    }

    async fn mark_verified(&self, id: i64) -> Result<bool, AppError> {
        let mut tables = self.tables.write().await;
        match tables.users.get_mut(&id) {
            Some(user) => {
                user.verified = true;
                user.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn create(&self, token: NewRefreshToken) -> Result<RefreshToken, AppError> {
        self.tables.write().await.insert_token(token)
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<RefreshToken>, AppError> {
        Ok(self.tables.read().await.tokens.get(token).cloned())
    }

    async fn get_by_user_id(&self, user_id: i64) -> Result<Vec<RefreshToken>, AppError> {
        let tables = self.tables.read().await;
        let mut tokens: Vec<RefreshToken> = tables
            .tokens
            .values()
            .filter(|token| token.user_id == user_id && token.revoked_at.is_none())
            .cloned()
            .collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(tokens)
    }

    async fn revoke(&self, token: &str) -> Result<bool, AppError> {
        let mut tables = self.tables.write().await;
        match tables.tokens.get_mut(token) {
            Some(record) if record.revoked_at.is_none() => {
                record.revoked_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_user(&self, user_id: i64) -> Result<u64, AppError> {
        Ok(self.tables.write().await.revoke_where(|token| token.user_id == user_id))
    }

    async fn revoke_family(&self, family_id: Uuid) -> Result<u64, AppError> {
        Ok(self.tables.write().await.revoke_where(|token| token.family_id == family_id))
    }

    async fn rotate(
        &self,
        old_token: &str,
        replacement: NewRefreshToken,
    ) -> Result<Option<RefreshToken>, AppError> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();

        match tables.tokens.get(old_token) {
            Some(record) if record.is_valid_at(now) => {}
            _ => return Ok(None),
        }
        if tables.tokens.contains_key(&replacement.token) {
            return Err(AppError::DatabaseError(DatabaseError::Duplicate));
        }

        if let Some(record) = tables.tokens.get_mut(old_token) {
            record.revoked_at = Some(now);
        }
        tables.insert_token(replacement).map(Some)
    }

    async fn delete_expired(&self) -> Result<u64, AppError> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let before = tables.tokens.len();
        tables.tokens.retain(|_, token| token.expires_at >= now);
        Ok((before - tables.tokens.len()) as u64)
    }
}
