//! In-memory credential store.
//!
//! Implements every repository trait on top of plain maps behind one async
//! mutex. Used by the test suites and handy for running the server without a
//! database.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::models::{NewSession, NewToken, NewUser, Session, Token, TwoFactorSettings, User};
use super::repository::{
    SessionRepository, StoreError, StoreResult, TokenRepository, TwoFactorSettingsRepository,
    UserRepository,
};

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    users: BTreeMap<i64, User>,
    sessions: BTreeMap<i64, Session>,
    tokens: BTreeMap<i64, Token>,
    two_factor: HashMap<i64, TwoFactorSettings>,
}

impl State {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn create(&self, user: NewUser) -> StoreResult<User> {
        let mut state = self.state.lock().await;
        if state
            .users
            .values()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(StoreError::Conflict("users"));
        }

        let now = Utc::now();
        let id = state.allocate_id();
        let user = User {
            id,
            username: user.username,
            email: user.email,
            display_name: user.display_name,
            password_hash: user.password_hash,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(id, user.clone());
        Ok(user)
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn find_by_token(&self, token_hash: &str) -> StoreResult<Option<Session>> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .values()
            .find(|s| s.token_hash == token_hash)
            .cloned())
    }

    async fn find_by_user(&self, user_id: i64) -> StoreResult<Vec<Session>> {
        let state = self.state.lock().await;
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));
        Ok(sessions)
    }

    async fn create(&self, session: NewSession) -> StoreResult<Session> {
        let mut state = self.state.lock().await;
        if state
            .sessions
            .values()
            .any(|s| s.token_hash == session.token_hash)
        {
            return Err(StoreError::Conflict("sessions"));
        }

        let id = state.allocate_id();
        let session = Session {
            id,
            user_id: session.user_id,
            token_hash: session.token_hash,
            client_ip: session.client_ip,
            user_agent: session.user_agent,
            created_at: session.created_at,
            last_used_at: session.created_at,
            rotated_at: session.created_at,
        };
        state.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn update(&self, session: &Session) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(stored) = state.sessions.get_mut(&session.id) {
            stored.last_used_at = session.last_used_at;
        }
        Ok(())
    }

    async fn rotate(&self, session: &Session, previous_token_hash: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        match state.sessions.get_mut(&session.id) {
            Some(stored) if stored.token_hash == previous_token_hash => {
                stored.token_hash.clone_from(&session.token_hash);
                stored.rotated_at = session.rotated_at;
                stored.last_used_at = session.last_used_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: i64, user_id: i64) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let owned = state.sessions.get(&id).is_some_and(|s| s.user_id == user_id);
        if owned {
            state.sessions.remove(&id);
        }
        Ok(owned)
    }

    async fn delete_expired(
        &self,
        lifetime_cutoff: DateTime<Utc>,
        inactivity_cutoff: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let before = state.sessions.len();
        state
            .sessions
            .retain(|_, s| s.created_at >= lifetime_cutoff && s.last_used_at >= inactivity_cutoff);
        Ok((before - state.sessions.len()) as u64)
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn find_by_token(&self, token_hash: &str) -> StoreResult<Option<Token>> {
        let state = self.state.lock().await;
        Ok(state
            .tokens
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn find_by_user(&self, user_id: i64) -> StoreResult<Vec<Token>> {
        let state = self.state.lock().await;
        Ok(state
            .tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn create(&self, token: NewToken) -> StoreResult<Token> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let id = state.allocate_id();
        let token = Token {
            id,
            user_id: token.user_id,
            name: token.name,
            token_hash: token.token_hash,
            created_at: now,
            updated_at: now,
        };
        state.tokens.insert(id, token.clone());
        Ok(token)
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        Ok(self.state.lock().await.tokens.remove(&id).is_some())
    }
}

#[async_trait]
impl TwoFactorSettingsRepository for MemoryStore {
    async fn find(&self, user_id: i64) -> StoreResult<Option<TwoFactorSettings>> {
        Ok(self.state.lock().await.two_factor.get(&user_id).cloned())
    }

    async fn save(&self, settings: &TwoFactorSettings) -> StoreResult<()> {
        self.state
            .lock()
            .await
            .two_factor
            .insert(settings.user_id, settings.clone());
        Ok(())
    }

    async fn update(&self, settings: &TwoFactorSettings) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(stored) = state.two_factor.get_mut(&settings.user_id) {
            stored.secret.clone_from(&settings.secret);
            stored.enabled = settings.enabled;
            stored.updated_at = settings.updated_at;
        }
        Ok(())
    }

    async fn delete(&self, user_id: i64) -> StoreResult<()> {
        self.state.lock().await.two_factor.remove(&user_id);
        Ok(())
    }
}
