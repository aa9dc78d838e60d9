//! Database Queries
//!
//! `PostgreSQL` implementation of the repository traits.
//! Runtime queries (no compile-time `DATABASE_URL` required).
//!
//! All query functions include error context logging to aid debugging.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::error;

use super::models::{NewSession, NewToken, NewUser, Session, Token, TwoFactorSettings, User};
use super::repository::{
    SessionRepository, StoreError, StoreResult, TokenRepository, TwoFactorSettingsRepository,
    UserRepository,
};

/// Log and return a database error with context.
///
/// This helper ensures all database errors are logged with relevant context
/// before being propagated, making production debugging easier.
macro_rules! db_error {
    ($query:expr) => {
        |e: sqlx::Error| {
            error!(query = $query, error = %e, "Database query failed");
            StoreError::from(e)
        }
    };
    ($query:expr, $($field:tt)*) => {
        |e: sqlx::Error| {
            error!(query = $query, $($field)*, error = %e, "Database query failed");
            StoreError::from(e)
        }
    };
}

/// Translate unique violations into [`StoreError::Conflict`].
fn insert_error(what: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(what),
        _ => {
            error!(query = what, error = %e, "Database insert failed");
            StoreError::from(e)
        }
    }
}

/// Credential store backed by `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// User Queries
// ============================================================================

#[async_trait]
impl UserRepository for PgStore {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error!("find_user_by_id", user_id = id))
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error!("find_user_by_username", username = %username))
    }

    async fn create(&self, user: NewUser) -> StoreResult<User> {
        sqlx::query_as::<_, User>(
            r"
            INSERT INTO users (username, email, display_name, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            ",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(insert_error("users"))
    }
}

// ============================================================================
// Session Queries
// ============================================================================

#[async_trait]
impl SessionRepository for PgStore {
    async fn find_by_token(&self, token_hash: &str) -> StoreResult<Option<Session>> {
        sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error!("find_session_by_token_hash"))
    }

    async fn find_by_user(&self, user_id: i64) -> StoreResult<Vec<Session>> {
        sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE user_id = $1 ORDER BY last_used_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error!("find_sessions_by_user", user_id = user_id))
    }

    async fn create(&self, session: NewSession) -> StoreResult<Session> {
        sqlx::query_as::<_, Session>(
            r"
            INSERT INTO sessions
                (user_id, token_hash, client_ip, user_agent, created_at, last_used_at, rotated_at)
            VALUES ($1, $2, $3, $4, $5, $5, $5)
            RETURNING *
            ",
        )
        .bind(session.user_id)
        .bind(&session.token_hash)
        .bind(&session.client_ip)
        .bind(&session.user_agent)
        .bind(session.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(insert_error("sessions"))
    }

    async fn update(&self, session: &Session) -> StoreResult<()> {
        sqlx::query("UPDATE sessions SET last_used_at = $2 WHERE id = $1")
            .bind(session.id)
            .bind(session.last_used_at)
            .execute(&self.pool)
            .await
            .map_err(db_error!("update_session", session_id = session.id))?;
        Ok(())
    }

    async fn rotate(&self, session: &Session, previous_token_hash: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE sessions
            SET token_hash = $2, rotated_at = $3, last_used_at = $4
            WHERE id = $1 AND token_hash = $5
            ",
        )
        .bind(session.id)
        .bind(&session.token_hash)
        .bind(session.rotated_at)
        .bind(session.last_used_at)
        .bind(previous_token_hash)
        .execute(&self.pool)
        .await
        .map_err(db_error!("rotate_session", session_id = session.id))?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: i64, user_id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_error!("delete_session", session_id = id, user_id = user_id))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(
        &self,
        lifetime_cutoff: DateTime<Utc>,
        inactivity_cutoff: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result =
            sqlx::query("DELETE FROM sessions WHERE created_at < $1 OR last_used_at < $2")
                .bind(lifetime_cutoff)
                .bind(inactivity_cutoff)
                .execute(&self.pool)
                .await
                .map_err(db_error!("delete_expired_sessions"))?;
        Ok(result.rows_affected())
    }
}

// ============================================================================
// API Token Queries
// ============================================================================

#[async_trait]
impl TokenRepository for PgStore {
    async fn find_by_token(&self, token_hash: &str) -> StoreResult<Option<Token>> {
        sqlx::query_as::<_, Token>("SELECT * FROM tokens WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error!("find_token_by_hash"))
    }

    async fn find_by_user(&self, user_id: i64) -> StoreResult<Vec<Token>> {
        sqlx::query_as::<_, Token>("SELECT * FROM tokens WHERE user_id = $1 ORDER BY created_at")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error!("find_tokens_by_user", user_id = user_id))
    }

    async fn create(&self, token: NewToken) -> StoreResult<Token> {
        sqlx::query_as::<_, Token>(
            r"
            INSERT INTO tokens (user_id, name, token_hash)
            VALUES ($1, $2, $3)
            RETURNING *
            ",
        )
        .bind(token.user_id)
        .bind(&token.name)
        .bind(&token.token_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(insert_error("tokens"))
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM tokens WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error!("delete_token", token_id = id))?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Two-Factor Settings Queries
// ============================================================================

#[async_trait]
impl TwoFactorSettingsRepository for PgStore {
    async fn find(&self, user_id: i64) -> StoreResult<Option<TwoFactorSettings>> {
        sqlx::query_as::<_, TwoFactorSettings>(
            "SELECT * FROM two_factor_settings WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error!("find_two_factor_settings", user_id = user_id))
    }

    async fn save(&self, settings: &TwoFactorSettings) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO two_factor_settings (user_id, secret, enabled, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO UPDATE
            SET secret = EXCLUDED.secret,
                enabled = EXCLUDED.enabled,
                created_at = EXCLUDED.created_at,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(settings.user_id)
        .bind(&settings.secret)
        .bind(settings.enabled)
        .bind(settings.created_at)
        .bind(settings.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error!("save_two_factor_settings", user_id = settings.user_id))?;
        Ok(())
    }

    async fn update(&self, settings: &TwoFactorSettings) -> StoreResult<()> {
        sqlx::query(
            "UPDATE two_factor_settings SET secret = $2, enabled = $3, updated_at = $4 WHERE user_id = $1",
        )
        .bind(settings.user_id)
        .bind(&settings.secret)
        .bind(settings.enabled)
        .bind(settings.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error!("update_two_factor_settings", user_id = settings.user_id))?;
        Ok(())
    }

    async fn delete(&self, user_id: i64) -> StoreResult<()> {
        sqlx::query("DELETE FROM two_factor_settings WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_error!("delete_two_factor_settings", user_id = user_id))?;
        Ok(())
    }
}
