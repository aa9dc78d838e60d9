//! API Router and Application State
//!
//! Central routing configuration and shared state.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    auth::{
        self, Authenticator, ForwardAuthResolver, PasswordAuthenticator, SessionManager,
        TokenService, TwoFactorService,
    },
    clock::Clock,
    config::Config,
    db::{Repositories, UserRepository},
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// User lookups for handlers
    pub users: Arc<dyn UserRepository>,
    /// Browser sessions
    pub sessions: Arc<SessionManager>,
    /// API tokens
    pub tokens: Arc<TokenService>,
    /// TOTP enrollment and verification
    pub two_factor: Arc<TwoFactorService>,
    /// Username/password login
    pub passwords: Arc<PasswordAuthenticator>,
    /// Per-request authentication
    pub authenticator: Arc<Authenticator>,
}

impl AppState {
    /// Wire every auth service against the given repositories and clock.
    #[must_use]
    pub fn new(config: Config, repos: Repositories, clock: Arc<dyn Clock>) -> Self {
        let sessions = Arc::new(SessionManager::new(
            repos.sessions,
            clock.clone(),
            &config.auth,
        ));
        let tokens = Arc::new(TokenService::new(repos.tokens));
        let two_factor = Arc::new(TwoFactorService::new(
            repos.two_factor,
            repos.users.clone(),
            clock,
            config.auth.totp_issuer.clone(),
        ));
        let passwords = Arc::new(PasswordAuthenticator::new(
            repos.users.clone(),
            two_factor.clone(),
        ));

        let forward_auth = config
            .forward_auth
            .enabled
            .then(|| ForwardAuthResolver::new(&config.forward_auth, repos.users.clone()));
        let authenticator = Arc::new(Authenticator::new(
            forward_auth,
            tokens.clone(),
            sessions.clone(),
            config.auth.session_cookie_name.clone(),
        ));

        Self {
            config: Arc::new(config),
            users: repos.users,
            sessions,
            tokens,
            two_factor,
            passwords,
            authenticator,
        }
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Auth routes (pass state for middleware)
        .nest("/api", auth::router(state.clone()))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // State
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    /// Service status
    status: &'static str,
    /// Whether reverse proxy authentication is enabled
    forward_auth: bool,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        forward_auth: state.config.forward_auth.enabled,
    })
}
