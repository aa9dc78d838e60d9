//! Authentication Middleware

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::header::SET_COOKIE,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;

use crate::api::AppState;

use super::cookie::session_cookie;
use super::error::AuthError;

/// Middleware to require authentication.
///
/// Runs the [`Authenticator`](super::Authenticator), injects the resulting
/// [`AuthContext`](super::AuthContext) into request extensions and, when the
/// session token was rotated, sets the new cookie on the response. A session
/// cookie set by the handler itself (logout) takes precedence.
///
/// # Usage
///
/// ```ignore
/// Router::new()
///     .route("/protected", get(handler))
///     .layer(axum::middleware::from_fn_with_state(state, require_auth))
/// ```
pub async fn require_auth(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let authenticated = state
        .authenticator
        .authenticate(Some(addr.ip()), request.headers())
        .await
        .inspect_err(|e| tracing::debug!(error = %e, path = %request.uri().path(), "Request rejected"))?;

    request.extensions_mut().insert(authenticated.context);
    let response = next.run(request).await;

    let cookie_name = &state.config.auth.session_cookie_name;
    Ok(match authenticated.rotated_session_token {
        Some(token) if !sets_cookie(&response, cookie_name) => {
            let jar = CookieJar::new().add(session_cookie(&state.config.auth, token));
            (jar, response).into_response()
        }
        _ => response,
    })
}

fn sets_cookie(response: &Response, name: &str) -> bool {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split_once('='))
        .any(|(cookie, _)| cookie.trim() == name)
}
