//! Request-scoped identity.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::error::{AuthError, AuthResult};

/// Identity resolved for the current request.
///
/// Inserted into request extensions by [`require_auth`](super::require_auth).
/// Exactly one exists per authenticated request, whichever scheme produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: i64,
    /// Set only for cookie sessions.
    pub session_id: Option<i64>,
    /// Identity was asserted by a trusted reverse proxy.
    pub forward_auth: bool,
}

impl AuthContext {
    #[must_use]
    pub const fn session(user_id: i64, session_id: i64) -> Self {
        Self {
            user_id,
            session_id: Some(session_id),
            forward_auth: false,
        }
    }

    #[must_use]
    pub const fn api_token(user_id: i64) -> Self {
        Self {
            user_id,
            session_id: None,
            forward_auth: false,
        }
    }

    #[must_use]
    pub const fn forward_auth(user_id: i64) -> Self {
        Self {
            user_id,
            session_id: None,
            forward_auth: true,
        }
    }

    /// Session id, or [`AuthError::SessionRequired`] for token and
    /// forward-auth requests.
    ///
    /// Guards operations a leaked API token must not be able to perform,
    /// such as minting or revoking other tokens.
    pub const fn require_session(&self) -> AuthResult<i64> {
        match self.session_id {
            Some(id) => Ok(id),
            None => Err(AuthError::SessionRequired),
        }
    }
}

/// Extractor for the authenticated identity in handlers.
///
/// A missing context means the route was mounted without `require_auth`,
/// which is a wiring bug rather than an authorization failure.
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Self>().copied().ok_or_else(|| {
            tracing::error!(path = %parts.uri.path(), "AuthContext missing from request");
            AuthError::Unexpected
        })
    }
}
