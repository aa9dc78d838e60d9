//! Reusable test helpers for HTTP integration tests.
//!
//! Provides `TestApp` for building and sending requests through the full axum
//! router. The app runs on the in-memory store with a manually driven clock,
//! so no database is needed.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{self, header, Method, Request, Response};
use axum::Router;
use chrono::DateTime;
use http_body_util::BodyExt;
use tower::ServiceExt;
use tvh_gateway::api::{create_router, AppState};
use tvh_gateway::auth::hash_password;
use tvh_gateway::clock::MockClock;
use tvh_gateway::config::Config;
use tvh_gateway::db::{MemoryStore, NewUser, Repositories, User, UserRepository};

/// Fixed start time for the mock clock.
pub const START_TIMESTAMP: i64 = 1_700_000_010;

/// Default peer address of test requests.
pub const CLIENT_ADDR: &str = "127.0.0.1:40000";

/// Password of users made by [`TestApp::create_user`].
pub const PASSWORD: &str = "correct horse battery staple";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<MockClock>,
    pub config: Config,
}

impl TestApp {
    /// Build a test app with the default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default_for_test(), CLIENT_ADDR)
    }

    /// Build a test app whose requests appear to come from `peer`.
    pub fn with_config(config: Config, peer: &str) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(MockClock::new(
            DateTime::from_timestamp(START_TIMESTAMP, 0).expect("valid timestamp"),
        ));

        let state = AppState::new(
            config.clone(),
            Repositories::from_store(store.clone()),
            clock.clone(),
        );
        let peer: SocketAddr = peer.parse().expect("valid peer address");
        let router = create_router(state).layer(MockConnectInfo(peer));

        Self {
            router,
            store,
            clock,
            config,
        }
    }

    pub fn request(method: Method, uri: &str) -> http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    /// Send a request through the router via `tower::ServiceExt::oneshot`.
    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot request failed")
    }

    /// Insert a user with [`PASSWORD`].
    pub async fn create_user(&self, username: &str) -> User {
        self.store
            .create(NewUser {
                username: username.to_string(),
                email: format!("{username}@example.com"),
                display_name: username.to_string(),
                password_hash: Some(hash_password(PASSWORD).expect("hashing should succeed")),
            })
            .await
            .expect("Failed to create user")
    }

    /// Log in and return the session token from the cookie.
    pub async fn login(&self, username: &str) -> String {
        let response = self
            .oneshot(json_request(
                Method::POST,
                "/api/login",
                &serde_json::json!({ "username": username, "password": PASSWORD }),
            ))
            .await;
        assert_eq!(response.status(), 200, "login failed");
        session_cookie(&response, &self.config.auth.session_cookie_name)
            .expect("login should set the session cookie")
    }

    /// Cookie header value for a session token.
    pub fn cookie(&self, token: &str) -> String {
        format!("{}={token}", self.config.auth.session_cookie_name)
    }
}

/// JSON request without credentials.
pub fn json_request(method: Method, uri: &str, body: &serde_json::Value) -> Request<Body> {
    TestApp::request(method, uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

/// Value of the session cookie set by a response, if any.
pub fn session_cookie(response: &Response<Body>, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| v.strip_prefix(&prefix))
        .map(|rest| rest.split(';').next().unwrap_or_default().to_string())
}

/// Raw `Set-Cookie` header for the session cookie, attributes included.
pub fn raw_session_cookie(response: &Response<Body>, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&prefix))
        .map(str::to_string)
}

pub async fn body_to_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to collect response body")
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        let preview = String::from_utf8_lossy(&bytes);
        panic!("Failed to parse response as JSON: {e}\nBody: {preview}")
    })
}
