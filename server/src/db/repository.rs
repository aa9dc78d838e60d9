//! Repository contracts consumed by the auth services.
//!
//! Every store (`PgStore`, `MemoryStore`) implements all four traits so the
//! services can be wired against either without knowing which one they got.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::models::{NewSession, NewToken, NewUser, Session, Token, TwoFactorSettings, User};

/// Failure inside the credential store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A unique constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    Conflict(&'static str),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<User>>;

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    async fn create(&self, user: NewUser) -> StoreResult<User>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_by_token(&self, token_hash: &str) -> StoreResult<Option<Session>>;

    async fn find_by_user(&self, user_id: i64) -> StoreResult<Vec<Session>>;

    async fn create(&self, session: NewSession) -> StoreResult<Session>;

    /// Persist `last_used_at`. The token hash is left untouched.
    async fn update(&self, session: &Session) -> StoreResult<()>;

    /// Store a new token hash, `rotated_at` and `last_used_at`, but only if the
    /// stored hash still equals `previous_token_hash`.
    ///
    /// Returns `false` when another request rotated the session first.
    async fn rotate(&self, session: &Session, previous_token_hash: &str) -> StoreResult<bool>;

    /// Delete a session owned by `user_id`. Returns whether a row was removed.
    async fn delete(&self, id: i64, user_id: i64) -> StoreResult<bool>;

    /// Bulk delete sessions created before `lifetime_cutoff` or last used
    /// before `inactivity_cutoff`.
    async fn delete_expired(
        &self,
        lifetime_cutoff: DateTime<Utc>,
        inactivity_cutoff: DateTime<Utc>,
    ) -> StoreResult<u64>;
}

#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn find_by_token(&self, token_hash: &str) -> StoreResult<Option<Token>>;

    async fn find_by_user(&self, user_id: i64) -> StoreResult<Vec<Token>>;

    async fn create(&self, token: NewToken) -> StoreResult<Token>;

    async fn delete(&self, id: i64) -> StoreResult<bool>;
}

#[async_trait]
pub trait TwoFactorSettingsRepository: Send + Sync {
    async fn find(&self, user_id: i64) -> StoreResult<Option<TwoFactorSettings>>;

    /// Insert or overwrite the settings row for `settings.user_id`.
    async fn save(&self, settings: &TwoFactorSettings) -> StoreResult<()>;

    async fn update(&self, settings: &TwoFactorSettings) -> StoreResult<()>;

    async fn delete(&self, user_id: i64) -> StoreResult<()>;
}

/// Handles to every repository, usually all backed by the same store.
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub tokens: Arc<dyn TokenRepository>,
    pub two_factor: Arc<dyn TwoFactorSettingsRepository>,
}

impl Repositories {
    /// Use one store for all four repositories.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: UserRepository
            + SessionRepository
            + TokenRepository
            + TwoFactorSettingsRepository
            + 'static,
    {
        Self {
            users: store.clone(),
            sessions: store.clone(),
            tokens: store.clone(),
            two_factor: store,
        }
    }
}
