//! Session cookie construction.

use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

use crate::config::AuthConfig;

/// Cookies are scoped to the API.
const COOKIE_PATH: &str = "/api";

const COOKIE_MAX_AGE_DAYS: i64 = 365;

/// Cookie carrying a session token.
#[must_use]
pub fn session_cookie(config: &AuthConfig, token: String) -> Cookie<'static> {
    Cookie::build((config.session_cookie_name.clone(), token))
        .path(COOKIE_PATH)
        .http_only(true)
        .secure(config.session_cookie_secure)
        .same_site(SameSite::Lax)
        .max_age(Duration::days(COOKIE_MAX_AGE_DAYS))
        .build()
}

/// Expired cookie that makes the browser drop the session token.
#[must_use]
pub fn clear_session_cookie(config: &AuthConfig) -> Cookie<'static> {
    Cookie::build((config.session_cookie_name.clone(), String::new()))
        .path(COOKIE_PATH)
        .http_only(true)
        .secure(config.session_cookie_secure)
        .same_site(SameSite::Lax)
        .max_age(Duration::ZERO)
        .build()
}
