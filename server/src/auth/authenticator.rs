//! Per-request authentication.
//!
//! Schemes are tried in a fixed order and the first conclusive answer wins:
//!
//! 1. forward auth, when enabled (inconclusive results fall through)
//! 2. `Authorization` header with a bearer API token (failure is final)
//! 3. session cookie

use std::net::IpAddr;
use std::sync::Arc;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;

use super::context::AuthContext;
use super::error::{AuthError, AuthResult, TokenFailure};
use super::forward_auth::ForwardAuthResolver;
use super::session::SessionManager;
use super::token::TokenService;

/// Outcome of a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub context: AuthContext,
    /// Replacement session token that must be set as the new cookie value.
    pub rotated_session_token: Option<String>,
}

impl Authenticated {
    const fn new(context: AuthContext) -> Self {
        Self {
            context,
            rotated_session_token: None,
        }
    }
}

pub struct Authenticator {
    forward_auth: Option<ForwardAuthResolver>,
    tokens: Arc<TokenService>,
    sessions: Arc<SessionManager>,
    cookie_name: String,
}

impl Authenticator {
    /// `forward_auth` is `None` when the feature is disabled.
    pub fn new(
        forward_auth: Option<ForwardAuthResolver>,
        tokens: Arc<TokenService>,
        sessions: Arc<SessionManager>,
        cookie_name: impl Into<String>,
    ) -> Self {
        Self {
            forward_auth,
            tokens,
            sessions,
            cookie_name: cookie_name.into(),
        }
    }

    pub async fn authenticate(
        &self,
        remote: Option<IpAddr>,
        headers: &HeaderMap,
    ) -> AuthResult<Authenticated> {
        if let Some(resolver) = &self.forward_auth {
            if let Some(context) = resolver.resolve(remote, headers).await {
                return Ok(Authenticated::new(context));
            }
        }

        if let Some(token) = bearer_token(headers) {
            let context = self.tokens.validate(token?).await?;
            return Ok(Authenticated::new(context));
        }

        let jar = CookieJar::from_headers(headers);
        let cookie = jar
            .get(&self.cookie_name)
            .filter(|c| !c.value().is_empty())
            .ok_or(AuthError::InvalidOrExpiredToken(TokenFailure::TokenInvalid))?;

        let validated = self.sessions.validate(cookie.value()).await?;
        Ok(Authenticated {
            context: validated.context,
            rotated_session_token: validated.rotated_token,
        })
    }
}

/// Token from the `Authorization` header, or `None` when there is no header.
///
/// The scheme is matched case-insensitively. Any other scheme, a non-ASCII
/// value or an empty token is an invalid token.
fn bearer_token(headers: &HeaderMap) -> Option<AuthResult<&str>> {
    let value = headers.get(AUTHORIZATION)?;

    let token = value
        .to_str()
        .ok()
        .and_then(|v| v.trim().split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim())
        .filter(|token| !token.is_empty());

    Some(token.ok_or(AuthError::InvalidOrExpiredToken(TokenFailure::TokenInvalid)))
}
