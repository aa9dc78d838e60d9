//! Authentication Service
//!
//! Handles password login, rotating browser sessions, API tokens, TOTP
//! two-factor enrollment and reverse-proxy forward auth.

/// Log a store failure with context and collapse it to [`AuthError::Unexpected`].
macro_rules! store_failure {
    ($msg:literal) => {
        |e: $crate::db::StoreError| {
            tracing::error!(error = %e, $msg);
            $crate::auth::AuthError::Unexpected
        }
    };
    ($msg:literal, $($field:tt)*) => {
        |e: $crate::db::StoreError| {
            tracing::error!($($field)*, error = %e, $msg);
            $crate::auth::AuthError::Unexpected
        }
    };
}

mod authenticator;
mod context;
mod cookie;
mod error;
pub mod forward_auth;
mod handlers;
mod middleware;
pub mod password;
pub mod session;
pub mod token;
pub mod two_factor;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::api::AppState;

pub use authenticator::{Authenticated, Authenticator};
pub use context::AuthContext;
pub use cookie::{clear_session_cookie, session_cookie};
pub use error::{AuthError, AuthResult, TokenFailure};
pub use forward_auth::ForwardAuthResolver;
pub use middleware::require_auth;
pub use password::{hash_password, verify_password, PasswordAuthenticator};
pub use session::{CleanerHandle, SessionCleaner, SessionManager, ValidatedSession};
pub use token::{IssuedToken, TokenService};
pub use two_factor::TwoFactorService;

/// Number of random bytes in a session or API token (256 bits).
const TOKEN_BYTES: usize = 32;

/// Generate a new random token value, hex encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA256 hex digest of a token. Only this digest is ever persisted.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Create authentication router.
///
/// Public routes (no auth required):
/// - POST /login - Login with username/password (+ TOTP code)
///
/// Protected routes (auth required):
/// - POST /logout - Revoke the current session
/// - GET /user - Current user profile
/// - GET /sessions, DELETE /sessions/{id} - Session management
/// - GET /tokens, POST /tokens, DELETE /tokens/{id} - API tokens (session auth only)
/// - GET /two-factor-auth - Two-factor status
/// - PUT /two-factor-auth/{setup,activate,deactivate} - Two-factor enrollment
pub fn router(state: AppState) -> Router<AppState> {
    let public_routes = Router::new().route("/login", post(handlers::login));

    let protected_routes = Router::new()
        .route("/logout", post(handlers::logout))
        .route("/user", get(handlers::get_user))
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions/{id}", delete(handlers::revoke_session))
        .route(
            "/tokens",
            get(handlers::list_tokens).post(handlers::create_token),
        )
        .route("/tokens/{id}", delete(handlers::revoke_token))
        .route("/two-factor-auth", get(handlers::two_factor_status))
        .route("/two-factor-auth/setup", put(handlers::two_factor_setup))
        .route("/two-factor-auth/activate", put(handlers::two_factor_activate))
        .route(
            "/two-factor-auth/deactivate",
            put(handlers::two_factor_deactivate),
        )
        .layer(axum_middleware::from_fn_with_state(state, require_auth));

    public_routes.merge(protected_routes)
}
