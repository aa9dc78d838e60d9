//! Authentication HTTP Handlers

use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::AuthContext;
use super::cookie::{clear_session_cookie, session_cookie};
use super::error::{AuthError, AuthResult};
use super::token::TokenInfo;
use super::two_factor::TwoFactorStatus;
use crate::api::AppState;
use crate::db::User;

/// Maximum stored length of a user agent string.
const MAX_USER_AGENT_LEN: usize = 512;

/// Maximum length of an API token name.
const MAX_TOKEN_NAME_LEN: usize = 64;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Login request.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
    /// TOTP code (required if two-factor auth is enabled).
    pub totp_code: Option<String>,
}

/// Current user.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub display_name: String,
    /// Whether this request was authenticated by the reverse proxy.
    pub forward_auth: bool,
}

impl UserResponse {
    fn new(user: User, forward_auth: bool) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            display_name: user.display_name,
            forward_auth,
        }
    }
}

/// Session as listed to its owner.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: i64,
    pub client_ip: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    /// The session this request was made with.
    pub current: bool,
}

/// API token creation request.
#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub name: String,
}

/// Newly created API token. The only response that ever contains `token`.
#[derive(Debug, Serialize)]
pub struct CreateTokenResponse {
    pub id: i64,
    pub name: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
}

/// Password re-confirmation for two-factor setup.
#[derive(Debug, Deserialize)]
pub struct ConfirmPasswordRequest {
    pub password: String,
}

/// Password plus TOTP code for activating or deactivating two-factor auth.
#[derive(Debug, Deserialize)]
pub struct TwoFactorCodeRequest {
    pub password: String,
    pub code: String,
}

/// Two-factor setup response.
#[derive(Debug, Serialize)]
pub struct TwoFactorSetupResponse {
    /// `otpauth://` provisioning URL, rendered as a QR code by the client.
    pub url: String,
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Extract User-Agent from headers (control characters removed, truncated).
fn extract_user_agent(headers: &HeaderMap) -> String {
    headers
        .get(USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(|s| {
            s.chars()
                .filter(|c| !c.is_control() || c.is_whitespace())
                .take(MAX_USER_AGENT_LEN)
                .collect()
        })
        .unwrap_or_default()
}

async fn load_user(state: &AppState, user_id: i64) -> AuthResult<User> {
    state
        .users
        .find_by_id(user_id)
        .await
        .map_err(store_failure!("Failed to load user", user_id = user_id))?
        .ok_or(AuthError::NotFound("user"))
}

// ============================================================================
// Handlers
// ============================================================================

/// Login with username and password.
///
/// Sets the session cookie on success.
///
/// POST /api/login
#[tracing::instrument(skip_all, fields(username = tracing::field::Empty))]
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> AuthResult<(CookieJar, Json<UserResponse>)> {
    let Json(body) = body?;
    tracing::Span::current().record("username", body.username.as_str());

    if body.username.trim().is_empty() {
        return Err(AuthError::Validation("username is required".into()));
    }

    let user = state
        .passwords
        .login(&body.username, &body.password, body.totp_code.as_deref())
        .await?;

    let token = state
        .sessions
        .create(user.id, &addr.ip().to_string(), &extract_user_agent(&headers))
        .await?;

    tracing::info!(user_id = user.id, "User logged in");

    let jar = CookieJar::new().add(session_cookie(&state.config.auth, token));
    Ok((jar, Json(UserResponse::new(user, false))))
}

/// Logout. Revokes the current session, if any, and clears the cookie.
///
/// POST /api/logout
#[tracing::instrument(skip(state), fields(user_id = ctx.user_id))]
pub async fn logout(
    State(state): State<AppState>,
    ctx: AuthContext,
) -> AuthResult<(CookieJar, StatusCode)> {
    if let Some(session_id) = ctx.session_id {
        state.sessions.revoke(session_id, ctx.user_id).await?;
        tracing::info!(user_id = ctx.user_id, "User logged out");
    }

    let jar = CookieJar::new().add(clear_session_cookie(&state.config.auth));
    Ok((jar, StatusCode::NO_CONTENT))
}

/// Get the current user.
///
/// GET /api/user
pub async fn get_user(
    State(state): State<AppState>,
    ctx: AuthContext,
) -> AuthResult<Json<UserResponse>> {
    let user = load_user(&state, ctx.user_id).await?;
    Ok(Json(UserResponse::new(user, ctx.forward_auth)))
}

/// List the current user's sessions.
///
/// GET /api/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    ctx: AuthContext,
) -> AuthResult<Json<Vec<SessionResponse>>> {
    let sessions = state.sessions.list(ctx.user_id).await?;

    Ok(Json(
        sessions
            .into_iter()
            .map(|s| SessionResponse {
                current: ctx.session_id == Some(s.id),
                id: s.id,
                client_ip: s.client_ip,
                user_agent: s.user_agent,
                created_at: s.created_at,
                last_used_at: s.last_used_at,
            })
            .collect(),
    ))
}

/// Revoke one of the current user's sessions.
///
/// DELETE /api/sessions/{id}
#[tracing::instrument(skip(state), fields(user_id = ctx.user_id))]
pub async fn revoke_session(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<i64>,
) -> AuthResult<StatusCode> {
    if state.sessions.revoke(id, ctx.user_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AuthError::NotFound("session"))
    }
}

/// List API tokens. Session auth only.
///
/// GET /api/tokens
pub async fn list_tokens(
    State(state): State<AppState>,
    ctx: AuthContext,
) -> AuthResult<Json<Vec<TokenInfo>>> {
    ctx.require_session()?;
    Ok(Json(state.tokens.list(ctx.user_id).await?))
}

/// Create an API token. Session auth only, so a token cannot mint more tokens.
///
/// POST /api/tokens
#[tracing::instrument(skip(state, body), fields(user_id = ctx.user_id))]
pub async fn create_token(
    State(state): State<AppState>,
    ctx: AuthContext,
    body: Result<Json<CreateTokenRequest>, JsonRejection>,
) -> AuthResult<(StatusCode, Json<CreateTokenResponse>)> {
    ctx.require_session()?;
    let Json(body) = body?;

    let name = body.name.trim();
    if name.is_empty() || name.chars().count() > MAX_TOKEN_NAME_LEN {
        return Err(AuthError::Validation(format!(
            "token name must be 1 to {MAX_TOKEN_NAME_LEN} characters"
        )));
    }

    let issued = state.tokens.create(ctx.user_id, name).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateTokenResponse {
            id: issued.token.id,
            name: issued.token.name,
            token: issued.plaintext,
            created_at: issued.token.created_at,
        }),
    ))
}

/// Revoke one of the current user's API tokens. Session auth only.
///
/// DELETE /api/tokens/{id}
#[tracing::instrument(skip(state), fields(user_id = ctx.user_id))]
pub async fn revoke_token(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<i64>,
) -> AuthResult<StatusCode> {
    ctx.require_session()?;

    if state.tokens.find_owned(id, ctx.user_id).await?.is_none() {
        return Err(AuthError::NotFound("token"));
    }

    state.tokens.revoke(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Two-factor status.
///
/// GET /api/two-factor-auth
pub async fn two_factor_status(
    State(state): State<AppState>,
    ctx: AuthContext,
) -> AuthResult<Json<TwoFactorStatus>> {
    Ok(Json(state.two_factor.get_settings(ctx.user_id).await?))
}

/// Start two-factor enrollment.
///
/// PUT /api/two-factor-auth/setup
#[tracing::instrument(skip(state, body), fields(user_id = ctx.user_id))]
pub async fn two_factor_setup(
    State(state): State<AppState>,
    ctx: AuthContext,
    body: Result<Json<ConfirmPasswordRequest>, JsonRejection>,
) -> AuthResult<Json<TwoFactorSetupResponse>> {
    let Json(body) = body?;
    state
        .passwords
        .confirm_password(ctx.user_id, &body.password)
        .await?;

    let url = state.two_factor.setup(ctx.user_id).await?;
    Ok(Json(TwoFactorSetupResponse { url }))
}

/// Finish enrollment with the first code from the authenticator app.
///
/// PUT /api/two-factor-auth/activate
#[tracing::instrument(skip(state, body), fields(user_id = ctx.user_id))]
pub async fn two_factor_activate(
    State(state): State<AppState>,
    ctx: AuthContext,
    body: Result<Json<TwoFactorCodeRequest>, JsonRejection>,
) -> AuthResult<Json<TwoFactorStatus>> {
    let Json(body) = body?;
    state
        .passwords
        .confirm_password(ctx.user_id, &body.password)
        .await?;

    state.two_factor.activate(ctx.user_id, &body.code).await?;
    Ok(Json(state.two_factor.get_settings(ctx.user_id).await?))
}

/// Turn two-factor auth off.
///
/// PUT /api/two-factor-auth/deactivate
#[tracing::instrument(skip(state, body), fields(user_id = ctx.user_id))]
pub async fn two_factor_deactivate(
    State(state): State<AppState>,
    ctx: AuthContext,
    body: Result<Json<TwoFactorCodeRequest>, JsonRejection>,
) -> AuthResult<Json<TwoFactorStatus>> {
    let Json(body) = body?;
    state
        .passwords
        .confirm_password(ctx.user_id, &body.password)
        .await?;

    state.two_factor.deactivate(ctx.user_id, &body.code).await?;
    Ok(Json(TwoFactorStatus::default()))
}
