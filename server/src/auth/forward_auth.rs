//! Reverse proxy ("forward auth") identity.
//!
//! A proxy such as Authelia or oauth2-proxy authenticates the user and passes
//! the username in a header. That header is trusted only when the connection
//! comes from an allowlisted address, since any client could set it.

use std::net::IpAddr;
use std::sync::Arc;

use axum::http::HeaderMap;
use ipnetwork::IpNetwork;

use super::context::AuthContext;
use crate::config::ForwardAuthConfig;
use crate::db::{NewUser, StoreError, User, UserRepository};

/// Domain used for the email of auto-registered users the proxy sent no email for.
const FALLBACK_EMAIL_DOMAIN: &str = "forward-auth.local";

pub struct ForwardAuthResolver {
    users: Arc<dyn UserRepository>,
    trusted: Vec<IpNetwork>,
    user_header: String,
    email_header: String,
    name_header: String,
    auto_register: bool,
}

impl ForwardAuthResolver {
    /// Build a resolver. Entries of the allowlist that are neither an IP nor a
    /// CIDR block are logged and ignored.
    pub fn new(config: &ForwardAuthConfig, users: Arc<dyn UserRepository>) -> Self {
        let trusted = config
            .trusted_networks
            .iter()
            .filter_map(|entry| match entry.parse::<IpNetwork>() {
                Ok(net) => Some(net),
                Err(e) => {
                    tracing::warn!(entry = %entry, error = %e, "Ignoring invalid forward auth network");
                    None
                }
            })
            .collect::<Vec<_>>();

        if trusted.is_empty() {
            tracing::warn!("Forward auth has no trusted networks, every request will be rejected");
        }

        Self {
            users,
            trusted,
            user_header: config.user_header.clone(),
            email_header: config.email_header.clone(),
            name_header: config.name_header.clone(),
            auto_register: config.auto_register,
        }
    }

    /// Whether `addr` belongs to a trusted proxy.
    pub fn is_trusted(&self, addr: IpAddr) -> bool {
        let addr = addr.to_canonical();
        self.trusted.iter().any(|net| net.contains(addr))
    }

    /// Resolve the proxy-asserted identity.
    ///
    /// `None` means this scheme does not apply and the caller should try the
    /// next one. That includes store failures, which are logged here.
    pub async fn resolve(&self, remote: Option<IpAddr>, headers: &HeaderMap) -> Option<AuthContext> {
        let Some(remote) = remote else {
            tracing::debug!("Forward auth skipped, remote address unknown");
            return None;
        };

        if !self.is_trusted(remote) {
            tracing::debug!(remote = %remote, "Forward auth skipped, address not trusted");
            return None;
        }

        let username = header_value(headers, &self.user_header)?;

        let user = match self.users.find_by_username(username).await {
            Ok(Some(user)) => user,
            Ok(None) if self.auto_register => self.register(username, headers).await?,
            Ok(None) => {
                tracing::debug!(username = %username, "Forward auth user unknown");
                return None;
            }
            Err(e) => {
                tracing::error!(error = %e, username = %username, "Forward auth user lookup failed");
                return None;
            }
        };

        Some(AuthContext::forward_auth(user.id))
    }

    async fn register(&self, username: &str, headers: &HeaderMap) -> Option<User> {
        let email = header_value(headers, &self.email_header)
            .map_or_else(|| format!("{username}@{FALLBACK_EMAIL_DOMAIN}"), str::to_string);
        let display_name = header_value(headers, &self.name_header).unwrap_or(username);

        let new_user = NewUser {
            username: username.to_string(),
            email: email.clone(),
            display_name: display_name.to_string(),
            password_hash: None,
        };

        match self.users.create(new_user).await {
            Ok(user) => {
                tracing::info!(user_id = user.id, username = %username, "Registered forward auth user");
                Some(user)
            }
            // Lost a race against a concurrent first request for the same user.
            Err(StoreError::Conflict(_)) => match self.users.find_by_username(username).await {
                Ok(Some(user)) => Some(user),
                // The username is free, so the email belongs to someone else.
                Ok(None) => {
                    tracing::warn!(
                        username = %username,
                        email = %email,
                        "Forward auth user not registered, email already taken by another user"
                    );
                    None
                }
                Err(e) => {
                    tracing::error!(error = %e, username = %username, "Forward auth user lookup failed");
                    None
                }
            },
            Err(e) => {
                tracing::error!(error = %e, username = %username, "Failed to register forward auth user");
                None
            }
        }
    }
}

/// Non-empty, valid UTF-8 header value.
fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;
    use crate::db::MemoryStore;

    fn config(networks: &[&str], auto_register: bool) -> ForwardAuthConfig {
        ForwardAuthConfig {
            enabled: true,
            trusted_networks: networks.iter().map(|s| (*s).to_string()).collect(),
            auto_register,
            ..ForwardAuthConfig::default()
        }
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    async fn store_with_user(username: &str) -> (Arc<MemoryStore>, i64) {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .create(NewUser {
                username: username.into(),
                email: format!("{username}@example.com"),
                display_name: username.into(),
                password_hash: None,
            })
            .await
            .unwrap();
        (store, user.id)
    }

    #[tokio::test]
    async fn test_trusted_proxy_resolves_known_user() {
        let (store, user_id) = store_with_user("carol").await;
        let resolver = ForwardAuthResolver::new(&config(&["10.0.0.0/8"], false), store);

        let ctx = resolver
            .resolve(
                Some("10.1.2.3".parse().unwrap()),
                &headers(&[("remote-user", "carol")]),
            )
            .await
            .unwrap();

        assert_eq!(ctx, AuthContext::forward_auth(user_id));
        assert!(ctx.forward_auth);
        assert_eq!(ctx.session_id, None);
    }

    #[tokio::test]
    async fn test_untrusted_address_never_authenticates() {
        let (store, _) = store_with_user("carol").await;
        let resolver =
            ForwardAuthResolver::new(&config(&["10.0.0.0/8", "192.168.1.5"], true), store);
        let headers = headers(&[("remote-user", "carol")]);

        for addr in ["192.168.1.6", "11.0.0.1", "::1"] {
            assert!(resolver
                .resolve(Some(addr.parse().unwrap()), &headers)
                .await
                .is_none());
        }
        assert!(resolver.resolve(None, &headers).await.is_none());
    }

    #[tokio::test]
    async fn test_exact_ip_and_mapped_ipv6_match() {
        let (store, _) = store_with_user("carol").await;
        let resolver = ForwardAuthResolver::new(&config(&["192.168.1.5"], false), store);

        assert!(resolver.is_trusted("192.168.1.5".parse().unwrap()));
        assert!(resolver.is_trusted("::ffff:192.168.1.5".parse().unwrap()));
        assert!(!resolver.is_trusted("192.168.1.4".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_malformed_entries_skipped() {
        let (store, _) = store_with_user("carol").await;
        let resolver =
            ForwardAuthResolver::new(&config(&["not-an-ip", "10.0.0.0/33", "127.0.0.1"], false), store);

        assert!(resolver.is_trusted("127.0.0.1".parse().unwrap()));
        assert_eq!(resolver.trusted.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_or_empty_header_rejected() {
        let (store, _) = store_with_user("carol").await;
        let resolver = ForwardAuthResolver::new(&config(&["127.0.0.1"], true), store);
        let local = Some("127.0.0.1".parse().unwrap());

        assert!(resolver.resolve(local, &HeaderMap::new()).await.is_none());
        assert!(resolver
            .resolve(local, &headers(&[("remote-user", "  ")]))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_user_rejected_without_auto_register() {
        let store = Arc::new(MemoryStore::new());
        let resolver = ForwardAuthResolver::new(&config(&["127.0.0.1"], false), store.clone());

        let ctx = resolver
            .resolve(
                Some("127.0.0.1".parse().unwrap()),
                &headers(&[("remote-user", "dave")]),
            )
            .await;
        assert!(ctx.is_none());
        assert!(store.find_by_username("dave").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_auto_register_uses_headers_and_fallbacks() {
        let store = Arc::new(MemoryStore::new());
        let resolver = ForwardAuthResolver::new(&config(&["127.0.0.1"], true), store.clone());
        let local = Some("127.0.0.1".parse().unwrap());

        let ctx = resolver
            .resolve(
                local,
                &headers(&[
                    ("remote-user", "erin"),
                    ("remote-email", "erin@corp.example"),
                    ("remote-name", "Erin E."),
                ]),
            )
            .await
            .unwrap();
        let erin = store.find_by_id(ctx.user_id).await.unwrap().unwrap();
        assert_eq!(erin.email, "erin@corp.example");
        assert_eq!(erin.display_name, "Erin E.");
        assert!(erin.password_hash.is_none());

        let ctx = resolver
            .resolve(local, &headers(&[("remote-user", "frank")]))
            .await
            .unwrap();
        let frank = store.find_by_id(ctx.user_id).await.unwrap().unwrap();
        assert_eq!(frank.email, "frank@forward-auth.local");
        assert_eq!(frank.display_name, "frank");

        // Second request resolves the same user instead of registering again.
        let again = resolver
            .resolve(local, &headers(&[("remote-user", "frank")]))
            .await
            .unwrap();
        assert_eq!(again.user_id, frank.id);
    }

    #[tokio::test]
    async fn test_auto_register_email_collision_does_not_authenticate() {
        let (store, carol) = store_with_user("carol").await;
        let resolver = ForwardAuthResolver::new(&config(&["127.0.0.1"], true), store.clone());

        let ctx = resolver
            .resolve(
                Some("127.0.0.1".parse().unwrap()),
                &headers(&[("remote-user", "imposter"), ("remote-email", "carol@example.com")]),
            )
            .await;

        assert_eq!(ctx, None);
        assert!(store.find_by_username("imposter").await.unwrap().is_none());
        assert_eq!(
            store.find_by_username("carol").await.unwrap().map(|u| u.id),
            Some(carol)
        );
    }
}
