//! tvh-gateway Server
//!
//! API backend in front of a TV-scheduling server. This crate holds the
//! authentication and session core: password and TOTP login, rotating
//! cookie sessions, API tokens and reverse proxy authentication.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
