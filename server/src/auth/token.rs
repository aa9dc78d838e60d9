//! API tokens.
//!
//! Long-lived bearer credentials for scripts and integrations. They never
//! expire and are never rotated; they stay valid until revoked.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::context::AuthContext;
use super::error::{AuthError, AuthResult, TokenFailure};
use super::{generate_token, hash_token};
use crate::db::{NewToken, Token, TokenRepository};

/// A freshly minted token. `plaintext` is shown to the user exactly once.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: Token,
    pub plaintext: String,
}

/// Token metadata as listed to its owner.
#[derive(Debug, Clone, Serialize)]
pub struct TokenInfo {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Token> for TokenInfo {
    fn from(token: Token) -> Self {
        Self {
            id: token.id,
            name: token.name,
            created_at: token.created_at,
            updated_at: token.updated_at,
        }
    }
}

pub struct TokenService {
    repo: Arc<dyn TokenRepository>,
}

impl TokenService {
    pub fn new(repo: Arc<dyn TokenRepository>) -> Self {
        Self { repo }
    }

    #[tracing::instrument(skip(self))]
    pub async fn create(&self, user_id: i64, name: &str) -> AuthResult<IssuedToken> {
        let plaintext = generate_token();

        let token = self
            .repo
            .create(NewToken {
                user_id,
                name: name.to_string(),
                token_hash: hash_token(&plaintext),
            })
            .await
            .map_err(store_failure!("Failed to create API token", user_id = user_id))?;

        tracing::info!(user_id, token_id = token.id, "API token created");
        Ok(IssuedToken { token, plaintext })
    }

    pub async fn validate(&self, token: &str) -> AuthResult<AuthContext> {
        let token = self
            .repo
            .find_by_token(&hash_token(token))
            .await
            .map_err(store_failure!("Failed to look up API token"))?
            .ok_or(AuthError::InvalidOrExpiredToken(TokenFailure::TokenInvalid))?;

        Ok(AuthContext::api_token(token.user_id))
    }

    /// Look up a token owned by `user_id`.
    pub async fn find_owned(&self, id: i64, user_id: i64) -> AuthResult<Option<TokenInfo>> {
        let tokens = self.list(user_id).await?;
        Ok(tokens.into_iter().find(|t| t.id == id))
    }

    pub async fn list(&self, user_id: i64) -> AuthResult<Vec<TokenInfo>> {
        let tokens = self
            .repo
            .find_by_user(user_id)
            .await
            .map_err(store_failure!("Failed to list API tokens", user_id = user_id))?;

        Ok(tokens.into_iter().map(TokenInfo::from).collect())
    }

    /// Delete a token by id.
    ///
    /// Ownership is not checked here. Callers must restrict this to session
    /// authenticated owners so a leaked token cannot revoke others.
    pub async fn revoke(&self, id: i64) -> AuthResult<bool> {
        let removed = self
            .repo
            .delete(id)
            .await
            .map_err(store_failure!("Failed to revoke API token", token_id = id))?;

        if removed {
            tracing::info!(token_id = id, "API token revoked");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn service() -> (TokenService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (TokenService::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_create_and_validate() {
        let (service, _store) = service();
        let issued = service.create(1, "ci").await.unwrap();
        assert_eq!(issued.token.name, "ci");
        assert_ne!(issued.token.token_hash, issued.plaintext);

        let ctx = service.validate(&issued.plaintext).await.unwrap();
        assert_eq!(ctx, AuthContext::api_token(1));
        assert_eq!(ctx.session_id, None);
        assert!(!ctx.forward_auth);
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let (service, _store) = service();
        assert_eq!(
            service.validate("bogus").await,
            Err(AuthError::InvalidOrExpiredToken(TokenFailure::TokenInvalid))
        );
    }

    #[tokio::test]
    async fn test_hash_lookup_only() {
        let (service, store) = service();
        let issued = service.create(1, "ci").await.unwrap();

        let found = TokenRepository::find_by_token(store.as_ref(), &issued.plaintext)
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_revoke_then_validate_fails() {
        let (service, _store) = service();
        let issued = service.create(1, "ci").await.unwrap();

        assert!(service.revoke(issued.token.id).await.unwrap());
        assert!(!service.revoke(issued.token.id).await.unwrap());
        assert!(service.validate(&issued.plaintext).await.is_err());
    }

    #[tokio::test]
    async fn test_find_owned_scopes_by_user() {
        let (service, _store) = service();
        let issued = service.create(1, "ci").await.unwrap();

        assert!(service.find_owned(issued.token.id, 2).await.unwrap().is_none());
        assert!(service.find_owned(issued.token.id, 1).await.unwrap().is_some());
        assert_eq!(service.list(1).await.unwrap().len(), 1);
    }
}
