//! Browser session lifecycle.
//!
//! Sessions are identified by a random token stored in a cookie. Only the
//! token's SHA256 digest is persisted. Each successful validation refreshes
//! `last_used_at`, and once the token is older than the rotation interval it
//! is replaced by a fresh value that the caller must hand back to the client.
//!
//! Expiry is enforced at validation time. Rows of expired sessions are
//! removed later by [`SessionCleaner`].

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::context::AuthContext;
use super::error::{AuthError, AuthResult, TokenFailure};
use super::{generate_token, hash_token};
use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::db::{NewSession, Session, SessionRepository, StoreResult};

/// Shortest period the cleaner will tick at.
const MIN_CLEANUP_INTERVAL: StdDuration = StdDuration::from_millis(1);

/// Result of a successful session validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSession {
    pub context: AuthContext,
    /// New plaintext token if the session was rotated. Must be sent back to
    /// the client, the old value no longer validates.
    pub rotated_token: Option<String>,
}

/// Session details safe to expose to the owning user.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: i64,
    pub client_ip: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl From<Session> for SessionInfo {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            client_ip: session.client_ip,
            user_agent: session.user_agent,
            created_at: session.created_at,
            last_used_at: session.last_used_at,
        }
    }
}

pub struct SessionManager {
    repo: Arc<dyn SessionRepository>,
    clock: Arc<dyn Clock>,
    lifetime: Duration,
    inactive_lifetime: Duration,
    rotation_interval: Duration,
    cleanup_interval: StdDuration,
}

impl SessionManager {
    pub fn new(repo: Arc<dyn SessionRepository>, clock: Arc<dyn Clock>, config: &AuthConfig) -> Self {
        Self {
            repo,
            clock,
            lifetime: config.session_lifetime,
            inactive_lifetime: config.inactive_session_lifetime,
            rotation_interval: config.session_rotation_interval,
            cleanup_interval: config.session_cleanup_interval,
        }
    }

    /// Start a session and return its plaintext token. The token is not
    /// recoverable afterwards.
    #[tracing::instrument(skip(self, user_agent))]
    pub async fn create(
        &self,
        user_id: i64,
        client_ip: &str,
        user_agent: &str,
    ) -> AuthResult<String> {
        let token = generate_token();

        let session = self
            .repo
            .create(NewSession {
                user_id,
                token_hash: hash_token(&token),
                client_ip: client_ip.to_string(),
                user_agent: user_agent.to_string(),
                created_at: self.clock.now(),
            })
            .await
            .map_err(store_failure!("Failed to create session", user_id = user_id))?;

        tracing::info!(user_id, session_id = session.id, "Session created");
        Ok(token)
    }

    /// Resolve a session token, enforcing both lifetimes and rotating the
    /// token when it is due.
    pub async fn validate(&self, token: &str) -> AuthResult<ValidatedSession> {
        let token_hash = hash_token(token);
        let mut session = self
            .repo
            .find_by_token(&token_hash)
            .await
            .map_err(store_failure!("Failed to look up session"))?
            .ok_or(AuthError::InvalidOrExpiredToken(TokenFailure::TokenInvalid))?;

        let now = self.clock.now();

        // A deadline past the representable range never expires.
        if session
            .created_at
            .checked_add_signed(self.lifetime)
            .is_some_and(|deadline| now > deadline)
        {
            return Err(AuthError::InvalidOrExpiredToken(
                TokenFailure::ExpiredTokenLifetime,
            ));
        }

        if session
            .last_used_at
            .checked_add_signed(self.inactive_lifetime)
            .is_some_and(|deadline| now > deadline)
        {
            return Err(AuthError::InvalidOrExpiredToken(
                TokenFailure::ExpiredInactiveTokenLifetime,
            ));
        }

        session.last_used_at = now;
        let mut rotated_token = None;

        if now - session.rotated_at >= self.rotation_interval {
            let new_token = generate_token();
            session.token_hash = hash_token(&new_token);
            session.rotated_at = now;

            let swapped = self
                .repo
                .rotate(&session, &token_hash)
                .await
                .map_err(store_failure!("Failed to rotate session", session_id = session.id))?;

            if swapped {
                tracing::debug!(session_id = session.id, "Session token rotated");
                rotated_token = Some(new_token);
            } else {
                // A concurrent request rotated first. Keep its token and only
                // record the activity.
                tracing::debug!(session_id = session.id, "Session rotated concurrently");
                self.touch(&session).await?;
            }
        } else {
            self.touch(&session).await?;
        }

        Ok(ValidatedSession {
            context: AuthContext::session(session.user_id, session.id),
            rotated_token,
        })
    }

    async fn touch(&self, session: &Session) -> AuthResult<()> {
        self.repo
            .update(session)
            .await
            .map_err(store_failure!("Failed to update session", session_id = session.id))
    }

    /// Sessions of a user, most recently used first.
    pub async fn list(&self, user_id: i64) -> AuthResult<Vec<SessionInfo>> {
        let sessions = self
            .repo
            .find_by_user(user_id)
            .await
            .map_err(store_failure!("Failed to list sessions", user_id = user_id))?;

        Ok(sessions.into_iter().map(SessionInfo::from).collect())
    }

    /// Delete a session. Scoped by owner so ids cannot be guessed across
    /// users. Returns whether a session was removed.
    pub async fn revoke(&self, session_id: i64, user_id: i64) -> AuthResult<bool> {
        let removed = self
            .repo
            .delete(session_id, user_id)
            .await
            .map_err(store_failure!(
                "Failed to revoke session",
                session_id = session_id,
                user_id = user_id
            ))?;

        if removed {
            tracing::info!(session_id, user_id, "Session revoked");
        }
        Ok(removed)
    }

    /// Background sweeper sharing this manager's store, clock and lifetimes.
    #[must_use]
    pub fn cleaner(&self) -> SessionCleaner {
        SessionCleaner {
            repo: self.repo.clone(),
            clock: self.clock.clone(),
            lifetime: self.lifetime,
            inactive_lifetime: self.inactive_lifetime,
            interval: self.cleanup_interval,
        }
    }
}

/// Periodically deletes expired sessions.
///
/// Sweeps once immediately on [`start`](Self::start), then every interval.
/// A failed sweep is logged and the next tick runs as usual.
pub struct SessionCleaner {
    repo: Arc<dyn SessionRepository>,
    clock: Arc<dyn Clock>,
    lifetime: Duration,
    inactive_lifetime: Duration,
    interval: StdDuration,
}

/// Running cleaner task.
pub struct CleanerHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SessionCleaner {
    /// Override the sweep interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: StdDuration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the sweep loop on the current runtime.
    pub fn start(self) -> CleanerHandle {
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let period = self.interval.max(MIN_CLEANUP_INTERVAL);
        let interval_secs = period.as_secs();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    _ = interval.tick() => {}
                }
                // A sweep runs to completion; stop is only observed between ticks.
                self.run_once().await;
            }

            tracing::debug!("Session cleaner stopped");
        });

        tracing::info!(interval_secs, "Session cleaner started");
        CleanerHandle { cancel, handle }
    }

    /// Delete every session past either lifetime in one bulk statement.
    pub async fn sweep(&self) -> StoreResult<u64> {
        let now = self.clock.now();
        let cutoff = |lifetime| {
            now.checked_sub_signed(lifetime)
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        };
        self.repo
            .delete_expired(cutoff(self.lifetime), cutoff(self.inactive_lifetime))
            .await
    }

    async fn run_once(&self) {
        match self.sweep().await {
            Ok(0) => tracing::debug!("No expired sessions"),
            Ok(deleted) => tracing::info!(deleted, "Deleted expired sessions"),
            Err(e) => tracing::error!(error = %e, "Failed to delete expired sessions"),
        }
    }
}

impl CleanerHandle {
    /// Signal the loop to stop and wait for it. An in-flight sweep finishes
    /// first.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Session cleaner task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::clock::MockClock;
    use crate::db::{MemoryStore, StoreError};

    fn start_time() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn manager() -> (SessionManager, Arc<MockClock>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(MockClock::new(start_time()));
        let manager = SessionManager::new(store.clone(), clock.clone(), &AuthConfig::default());
        (manager, clock, store)
    }

    #[tokio::test]
    async fn test_create_then_validate() {
        let (manager, _clock, _store) = manager();
        let token = manager.create(1, "127.0.0.1", "agent").await.unwrap();

        let validated = manager.validate(&token).await.unwrap();
        assert_eq!(validated.context.user_id, 1);
        assert!(validated.context.session_id.is_some());
        assert!(!validated.context.forward_auth);
        assert_eq!(validated.rotated_token, None);
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let (manager, _clock, _store) = manager();
        let err = manager.validate("nope").await.unwrap_err();
        assert_eq!(
            err,
            AuthError::InvalidOrExpiredToken(TokenFailure::TokenInvalid)
        );
    }

    #[tokio::test]
    async fn test_plaintext_token_not_stored() {
        let (manager, _clock, store) = manager();
        let token = manager.create(1, "127.0.0.1", "agent").await.unwrap();

        let by_plain = SessionRepository::find_by_token(store.as_ref(), &token)
            .await
            .unwrap();
        assert!(by_plain.is_none());
    }

    #[tokio::test]
    async fn test_absolute_lifetime_enforced_despite_activity() {
        let (manager, clock, _store) = manager();
        let mut token = manager.create(1, "127.0.0.1", "agent").await.unwrap();

        // Stay active every day until the 30 day lifetime runs out.
        for _ in 0..30 {
            clock.advance(Duration::days(1));
            let validated = manager.validate(&token).await.unwrap();
            if let Some(rotated) = validated.rotated_token {
                token = rotated;
            }
        }

        clock.advance(Duration::seconds(1));
        let err = manager.validate(&token).await.unwrap_err();
        assert_eq!(
            err,
            AuthError::InvalidOrExpiredToken(TokenFailure::ExpiredTokenLifetime)
        );
    }

    #[tokio::test]
    async fn test_inactivity_lifetime_enforced() {
        let (manager, clock, _store) = manager();
        let token = manager.create(1, "127.0.0.1", "agent").await.unwrap();

        clock.advance(Duration::days(7) + Duration::seconds(1));
        let err = manager.validate(&token).await.unwrap_err();
        assert_eq!(
            err,
            AuthError::InvalidOrExpiredToken(TokenFailure::ExpiredInactiveTokenLifetime)
        );
    }

    #[tokio::test]
    async fn test_no_rotation_before_interval() {
        let (manager, clock, _store) = manager();
        let token = manager.create(1, "127.0.0.1", "agent").await.unwrap();

        clock.advance(Duration::minutes(30) - Duration::seconds(1));
        let validated = manager.validate(&token).await.unwrap();
        assert_eq!(validated.rotated_token, None);
        assert!(manager.validate(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_rotation_replaces_token() {
        let (manager, clock, _store) = manager();
        let token = manager.create(1, "127.0.0.1", "agent").await.unwrap();

        clock.advance(Duration::minutes(30));
        let validated = manager.validate(&token).await.unwrap();
        let rotated = validated.rotated_token.expect("token should rotate");
        assert_ne!(rotated, token);

        let err = manager.validate(&token).await.unwrap_err();
        assert_eq!(
            err,
            AuthError::InvalidOrExpiredToken(TokenFailure::TokenInvalid)
        );

        let again = manager.validate(&rotated).await.unwrap();
        assert_eq!(again.context, validated.context);
        assert_eq!(again.rotated_token, None);
    }

    #[tokio::test]
    async fn test_validation_refreshes_inactivity_window() {
        let (manager, clock, _store) = manager();
        let mut token = manager.create(1, "127.0.0.1", "agent").await.unwrap();

        for _ in 0..3 {
            clock.advance(Duration::days(6));
            if let Some(rotated) = manager.validate(&token).await.unwrap().rotated_token {
                token = rotated;
            }
        }
        assert!(manager.validate(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_revoke_scoped_to_owner() {
        let (manager, _clock, _store) = manager();
        let token = manager.create(1, "127.0.0.1", "agent").await.unwrap();
        let session_id = manager
            .validate(&token)
            .await
            .unwrap()
            .context
            .session_id
            .unwrap();

        assert!(!manager.revoke(session_id, 2).await.unwrap());
        assert!(manager.validate(&token).await.is_ok());

        assert!(manager.revoke(session_id, 1).await.unwrap());
        assert!(manager.validate(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let (manager, _clock, _store) = manager();
        manager.create(1, "10.0.0.1", "a").await.unwrap();
        manager.create(1, "10.0.0.2", "b").await.unwrap();
        manager.create(2, "10.0.0.3", "c").await.unwrap();

        let sessions = manager.list(1).await.unwrap();
        assert_eq!(sessions.len(), 2);
    }

    #[tokio::test]
    async fn test_cleaner_sweeps_expired_sessions() {
        let (manager, clock, store) = manager();
        manager.create(1, "127.0.0.1", "old").await.unwrap();
        clock.advance(Duration::days(8));
        let fresh = manager.create(1, "127.0.0.1", "new").await.unwrap();

        let deleted = manager.cleaner().sweep().await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.session_count().await, 1);
        assert!(manager.validate(&fresh).await.is_ok());
    }

    #[tokio::test]
    async fn test_cleaner_runs_immediately_on_start() {
        let (manager, clock, store) = manager();
        manager.create(1, "127.0.0.1", "old").await.unwrap();
        clock.advance(Duration::days(31));

        let handle = manager.cleaner().start();
        for _ in 0..100 {
            if store.session_count().await == 0 {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        handle.stop().await;

        assert_eq!(store.session_count().await, 0);
    }

    /// Session store whose bulk delete always fails.
    struct FailingSweepStore {
        inner: MemoryStore,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl SessionRepository for FailingSweepStore {
        async fn find_by_token(&self, token_hash: &str) -> StoreResult<Option<Session>> {
            SessionRepository::find_by_token(&self.inner, token_hash).await
        }

        async fn find_by_user(&self, user_id: i64) -> StoreResult<Vec<Session>> {
            SessionRepository::find_by_user(&self.inner, user_id).await
        }

        async fn create(&self, session: NewSession) -> StoreResult<Session> {
            SessionRepository::create(&self.inner, session).await
        }

        async fn update(&self, session: &Session) -> StoreResult<()> {
            SessionRepository::update(&self.inner, session).await
        }

        async fn rotate(&self, session: &Session, previous: &str) -> StoreResult<bool> {
            self.inner.rotate(session, previous).await
        }

        async fn delete(&self, id: i64, user_id: i64) -> StoreResult<bool> {
            SessionRepository::delete(&self.inner, id, user_id).await
        }

        async fn delete_expired(
            &self,
            _lifetime_cutoff: DateTime<Utc>,
            _inactivity_cutoff: DateTime<Utc>,
        ) -> StoreResult<u64> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
    }

    #[tokio::test]
    async fn test_cleaner_survives_failed_sweeps() {
        let store = Arc::new(FailingSweepStore {
            inner: MemoryStore::new(),
            attempts: AtomicUsize::new(0),
        });
        let clock = Arc::new(MockClock::new(start_time()));
        let manager = SessionManager::new(store.clone(), clock, &AuthConfig::default());

        let handle = manager
            .cleaner()
            .with_interval(StdDuration::from_millis(10))
            .start();
        for _ in 0..200 {
            if store.attempts.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        handle.stop().await;

        assert!(store.attempts.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_sweep_propagates_store_errors() {
        let store = Arc::new(FailingSweepStore {
            inner: MemoryStore::new(),
            attempts: AtomicUsize::new(0),
        });
        let clock = Arc::new(MockClock::new(start_time()));
        let manager = SessionManager::new(store, clock, &AuthConfig::default());

        let err = manager.cleaner().sweep().await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[tokio::test]
    async fn test_huge_lifetimes_do_not_overflow() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(MockClock::new(start_time()));
        let config = AuthConfig {
            session_lifetime: Duration::seconds(100_000_000_000_000),
            inactive_session_lifetime: Duration::seconds(100_000_000_000_000),
            ..AuthConfig::default()
        };
        let manager = SessionManager::new(store.clone(), clock, &config);

        let token = manager.create(1, "127.0.0.1", "agent").await.unwrap();
        assert!(manager.validate(&token).await.is_ok());
        assert_eq!(manager.cleaner().sweep().await.unwrap(), 0);
        assert_eq!(store.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_cleaner_with_zero_interval_still_sweeps() {
        let (manager, clock, store) = manager();
        manager.create(1, "127.0.0.1", "old").await.unwrap();
        clock.advance(Duration::days(31));

        let handle = manager.cleaner().with_interval(StdDuration::ZERO).start();
        for _ in 0..100 {
            if store.session_count().await == 0 {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        handle.stop().await;

        assert_eq!(store.session_count().await, 0);
    }

    /// Session store where another request always rotates the session just
    /// before this one tries to.
    struct ConcurrentRotationStore {
        inner: MemoryStore,
        winner: Mutex<Option<String>>,
    }

    #[async_trait]
    impl SessionRepository for ConcurrentRotationStore {
        async fn find_by_token(&self, token_hash: &str) -> StoreResult<Option<Session>> {
            SessionRepository::find_by_token(&self.inner, token_hash).await
        }

        async fn find_by_user(&self, user_id: i64) -> StoreResult<Vec<Session>> {
            SessionRepository::find_by_user(&self.inner, user_id).await
        }

        async fn create(&self, session: NewSession) -> StoreResult<Session> {
            SessionRepository::create(&self.inner, session).await
        }

        async fn update(&self, session: &Session) -> StoreResult<()> {
            SessionRepository::update(&self.inner, session).await
        }

        async fn rotate(&self, session: &Session, previous: &str) -> StoreResult<bool> {
            let winner_token = generate_token();
            let winner = Session {
                token_hash: hash_token(&winner_token),
                last_used_at: session.rotated_at - Duration::seconds(5),
                ..session.clone()
            };
            assert!(self.inner.rotate(&winner, previous).await?);
            *self.winner.lock().await = Some(winner_token);

            self.inner.rotate(session, previous).await
        }

        async fn delete(&self, id: i64, user_id: i64) -> StoreResult<bool> {
            SessionRepository::delete(&self.inner, id, user_id).await
        }

        async fn delete_expired(
            &self,
            lifetime_cutoff: DateTime<Utc>,
            inactivity_cutoff: DateTime<Utc>,
        ) -> StoreResult<u64> {
            self.inner
                .delete_expired(lifetime_cutoff, inactivity_cutoff)
                .await
        }
    }

    #[tokio::test]
    async fn test_losing_rotation_race_keeps_winner_token() {
        let store = Arc::new(ConcurrentRotationStore {
            inner: MemoryStore::new(),
            winner: Mutex::new(None),
        });
        let clock = Arc::new(MockClock::new(start_time()));
        let manager = SessionManager::new(store.clone(), clock.clone(), &AuthConfig::default());
        let token = manager.create(1, "127.0.0.1", "agent").await.unwrap();

        clock.advance(Duration::minutes(31));
        let validated = manager.validate(&token).await.unwrap();
        assert_eq!(validated.context.user_id, 1);
        assert_eq!(validated.rotated_token, None);

        let winner = store.winner.lock().await.clone().expect("rotated concurrently");
        let stored = SessionRepository::find_by_token(&store.inner, &hash_token(&winner))
            .await
            .unwrap()
            .expect("winner token is stored");
        assert_eq!(stored.last_used_at, clock.now());
        assert_eq!(stored.rotated_at, clock.now());

        assert_eq!(
            manager.validate(&token).await.unwrap_err(),
            AuthError::InvalidOrExpiredToken(TokenFailure::TokenInvalid)
        );
    }
}
