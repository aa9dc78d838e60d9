//! Authentication Error Types

use std::fmt;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Why a session or API token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFailure {
    /// Unknown token, or no credentials at all.
    TokenInvalid,
    /// Session older than the absolute lifetime.
    ExpiredTokenLifetime,
    /// Session unused for longer than the inactivity lifetime.
    ExpiredInactiveTokenLifetime,
}

impl fmt::Display for TokenFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TokenInvalid => "invalid token",
            Self::ExpiredTokenLifetime => "token expired",
            Self::ExpiredInactiveTokenLifetime => "token expired due to inactivity",
        })
    }
}

/// Authentication error types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Missing, unknown or expired credentials.
    #[error("{0}")]
    InvalidOrExpiredToken(TokenFailure),

    /// Unknown user or wrong password. Deliberately indistinguishable.
    #[error("invalid username or password")]
    InvalidUsernameOrPassword,

    /// Password re-confirmation failed.
    #[error("confirmation password is invalid")]
    ConfirmationPasswordInvalid,

    /// Two-factor auth is enabled but no code was sent.
    #[error("two-factor auth code required")]
    TwoFactorRequired,

    /// The TOTP code did not match the current time step.
    #[error("invalid two-factor auth code")]
    TwoFactorCodeInvalid,

    #[error("two-factor auth is already enabled")]
    TwoFactorAlreadyEnabled,

    #[error("two-factor auth is not enabled")]
    TwoFactorNotEnabled,

    /// Activate was called without a prior setup.
    #[error("two-factor auth setup is not running")]
    TwoFactorSetupNotRunning,

    /// The operation is only allowed for session (cookie) authentication.
    #[error("this action requires a login session")]
    SessionRequired,

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Validation error.
    #[error("{0}")]
    Validation(String),

    /// Storage, crypto or wiring failure. Details are logged, never returned.
    #[error("unexpected error")]
    Unexpected,
}

/// Error response body for JSON responses.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub message: String,
}

impl AuthError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidOrExpiredToken(_) | Self::InvalidUsernameOrPassword => {
                StatusCode::UNAUTHORIZED
            }
            Self::ConfirmationPasswordInvalid
            | Self::TwoFactorRequired
            | Self::TwoFactorCodeInvalid
            | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::TwoFactorAlreadyEnabled
            | Self::TwoFactorNotEnabled
            | Self::TwoFactorSetupNotRunning => StatusCode::CONFLICT,
            Self::SessionRequired => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            message: self.to_string(),
        });

        (self.status(), body).into_response()
    }
}

impl From<JsonRejection> for AuthError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

/// Result type for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;
