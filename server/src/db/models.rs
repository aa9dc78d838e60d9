//! Database Models

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// User model.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub display_name: String,
    /// Argon2 PHC string. `None` for users provisioned by forward auth.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to insert a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub password_hash: Option<String>,
}

/// Browser session backed by a rotating cookie token.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    /// Session ID.
    pub id: i64,
    /// User this session belongs to.
    pub user_id: i64,
    /// SHA256 hash of the current session token.
    pub token_hash: String,
    /// IP address of the client at login.
    pub client_ip: String,
    /// User agent of the client at login.
    pub user_agent: String,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Last successful validation.
    pub last_used_at: DateTime<Utc>,
    /// When the token value was last replaced.
    pub rotated_at: DateTime<Utc>,
}

/// Fields required to insert a session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: i64,
    pub token_hash: String,
    pub client_ip: String,
    pub user_agent: String,
    /// Used for `created_at`, `last_used_at` and `rotated_at`.
    pub created_at: DateTime<Utc>,
}

/// Long-lived API token.
#[derive(Debug, Clone, FromRow)]
pub struct Token {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    /// SHA256 hash of the token value.
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to insert an API token.
#[derive(Debug, Clone)]
pub struct NewToken {
    pub user_id: i64,
    pub name: String,
    pub token_hash: String,
}

/// TOTP enrollment for a user. A row with `enabled = false` is a pending setup.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct TwoFactorSettings {
    pub user_id: i64,
    /// Base32 encoded TOTP secret.
    pub secret: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
