//! Authoritative session state with per-session locking.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::cache::{LeaseGuard, LeaseToken, SessionCache};
use crate::error::SessionError;
use crate::session::{GameSession, SessionId};

/// Cache key of a session's state.
pub fn session_key(id: &str) -> String {
    format!("session:{}", id)
}

/// Cache key of a join code.
pub fn code_key(code: &str) -> String {
    format!("code:{}", code.to_uppercase())
}

/// Cache key of a session's lock lease.
pub fn lock_key(id: &str) -> String {
    format!("lock:session:{}", id)
}

/// Holds the single authoritative state of every live session.
///
/// Reads through [`SessionStore::get`] never lock. Every
/// read-modify-write goes through [`SessionStore::with_session_lock`].
#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<dyn SessionCache>,
    lock_ttl: Duration,
    session_ttl: Duration,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("lock_ttl", &self.lock_ttl)
            .field("session_ttl", &self.session_ttl)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Creates a store over `cache`.
    pub fn new(cache: Arc<dyn SessionCache>, lock_ttl: Duration, session_ttl: Duration) -> Self {
        Self {
            cache,
            lock_ttl,
            session_ttl,
        }
    }

    /// Underlying cache.
    pub fn cache(&self) -> &Arc<dyn SessionCache> {
        &self.cache
    }

    /// Lease duration of the per-session lock.
    pub fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    /// Stores a brand new session and claims its join code.
    ///
    /// Returns false, storing nothing, if the code is already in use.
    #[instrument(skip(self, session), fields(session_id = %session.id, code = %session.code))]
    pub async fn insert_new(&self, session: &GameSession) -> Result<bool, SessionError> {
        let claimed = self
            .cache
            .set_if_absent(&code_key(&session.code), session.id.clone(), self.session_ttl)
            .await?;
        if !claimed {
            debug!("Join code already claimed");
            return Ok(false);
        }
        self.write(session).await?;
        Ok(true)
    }

    /// Current state of a session, without locking.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> Result<Option<GameSession>, SessionError> {
        match self.cache.get(&session_key(id)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Session id registered for a join code.
    #[instrument(skip(self))]
    pub async fn resolve_code(&self, code: &str) -> Result<Option<SessionId>, SessionError> {
        Ok(self.cache.get(&code_key(code)).await?)
    }

    /// Runs `f` with exclusive access to session `id`.
    ///
    /// Fails at once with a concurrency error if another holder has the
    /// lease, and with not-found if the session isn't cached. The state
    /// handed to `f` is loaded after the lease is taken. The lease is
    /// released on every exit path.
    #[instrument(skip(self, f))]
    pub async fn with_session_lock<F, Fut, T>(&self, id: &str, f: F) -> Result<T, SessionError>
    where
        F: FnOnce(LockedSession) -> Fut,
        Fut: Future<Output = Result<T, SessionError>>,
    {
        let key = lock_key(id);
        let Some(guard) = LeaseGuard::acquire(Arc::clone(&self.cache), key, self.lock_ttl).await?
        else {
            debug!("Session lock contended");
            return Err(SessionError::concurrency(id));
        };
        let token = guard.token().cloned();

        let result = match (self.get(id).await, token) {
            (Ok(Some(session)), Some(token)) => {
                let locked = LockedSession {
                    store: self.clone(),
                    session,
                    token,
                };
                f(locked).await
            }
            (Ok(Some(_)), None) | (Ok(None), _) => Err(SessionError::not_found(id)),
            (Err(e), _) => Err(e),
        };

        if let Err(e) = guard.release().await {
            warn!(error = %e, "Failed to release session lock");
        }
        result
    }

    async fn write(&self, session: &GameSession) -> Result<(), SessionError> {
        let json = serde_json::to_string(session)?;
        self.cache
            .set(&session_key(&session.id), json, self.session_ttl)
            .await?;
        self.cache
            .set(&code_key(&session.code), session.id.clone(), self.session_ttl)
            .await?;
        Ok(())
    }

    async fn remove(&self, session: &GameSession) -> Result<(), SessionError> {
        self.cache.delete(&session_key(&session.id)).await?;
        self.cache.delete(&code_key(&session.code)).await?;
        Ok(())
    }
}

/// Exclusive handle on a session, valid inside
/// [`SessionStore::with_session_lock`].
#[derive(Debug)]
pub struct LockedSession {
    store: SessionStore,
    session: GameSession,
    token: LeaseToken,
}

impl LockedSession {
    /// State as loaded under the lock, or as last saved.
    pub fn session(&self) -> &GameSession {
        &self.session
    }

    /// Persists `next` as the session's state.
    ///
    /// Fails with a concurrency error if the lease lapsed in the meantime.
    #[instrument(skip(self, next), fields(session_id = %next.id, sequence = next.state.sequence()))]
    pub async fn save(&mut self, next: GameSession) -> Result<(), SessionError> {
        self.ensure_held().await?;
        self.store.write(&next).await?;
        self.session = next;
        Ok(())
    }

    /// Removes the session from the cache.
    #[instrument(skip(self), fields(session_id = %self.session.id))]
    pub async fn evict(self) -> Result<GameSession, SessionError> {
        self.ensure_held().await?;
        self.store.remove(&self.session).await?;
        debug!("Session evicted");
        Ok(self.session)
    }

    async fn ensure_held(&self) -> Result<(), SessionError> {
        let holder = self.store.cache.get(&lock_key(&self.session.id)).await?;
        if holder.as_deref() == Some(self.token.as_str()) {
            Ok(())
        } else {
            warn!(session_id = %self.session.id, "Session lease lapsed inside critical section");
            Err(SessionError::concurrency(self.session.id.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use chrono::Utc;
    use toroid_rules::create_initial_state;

    fn store() -> SessionStore {
        SessionStore::new(
            Arc::new(MemoryCache::new()),
            Duration::from_secs(5),
            Duration::from_secs(3600),
        )
    }

    fn session(id: &str, code: &str) -> GameSession {
        GameSession::new(
            id.to_string(),
            code.to_string(),
            "alice".to_string(),
            create_initial_state(),
            Utc::now(),
            chrono::Duration::hours(1),
        )
    }

    #[tokio::test]
    async fn test_insert_and_resolve_code() {
        let store = store();
        assert!(store.insert_new(&session("s1", "ABC123")).await.unwrap());
        assert!(!store.insert_new(&session("s2", "ABC123")).await.unwrap());
        assert_eq!(
            store.resolve_code("abc123").await.unwrap().as_deref(),
            Some("s1")
        );
        assert!(store.get("s2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_is_released_after_error() {
        let store = store();
        store.insert_new(&session("s1", "ABC123")).await.unwrap();

        let err = store
            .with_session_lock("s1", |_| async {
                Err::<(), _>(SessionError::storage("boom"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind.code(), "storage_error");
        assert!(store.cache().get(&lock_key("s1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_held_lock_fails_fast() {
        let store = store();
        store.insert_new(&session("s1", "ABC123")).await.unwrap();
        store
            .cache()
            .set(&lock_key("s1"), "other".into(), Duration::from_secs(5))
            .await
            .unwrap();

        let err = store
            .with_session_lock("s1", |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(err.is_concurrency());
    }

    #[tokio::test]
    async fn test_save_and_evict() {
        let store = store();
        store.insert_new(&session("s1", "ABC123")).await.unwrap();

        store
            .with_session_lock("s1", |mut locked| async move {
                let mut next = locked.session().clone();
                next.seat_second("bob".into(), Utc::now())?;
                locked.save(next).await
            })
            .await
            .unwrap();
        assert_eq!(store.get("s1").await.unwrap().unwrap().players.len(), 2);

        store
            .with_session_lock("s1", |locked| async move { locked.evict().await.map(|_| ()) })
            .await
            .unwrap();
        assert!(store.get("s1").await.unwrap().is_none());
        assert!(store.resolve_code("ABC123").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_after_lease_lapse_is_refused() {
        let store = store();
        store.insert_new(&session("s1", "ABC123")).await.unwrap();
        let ttl = store.lock_ttl();

        let err = store
            .with_session_lock("s1", |mut locked| async move {
                tokio::time::sleep(ttl + Duration::from_millis(1)).await;
                let mut next = locked.session().clone();
                next.seat_second("bob".into(), Utc::now())?;
                locked.save(next).await
            })
            .await
            .unwrap_err();
        assert!(err.is_concurrency());
        assert_eq!(store.get("s1").await.unwrap().unwrap().players.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_after_lease_taken_over_is_refused() {
        let store = store();
        store.insert_new(&session("s1", "ABC123")).await.unwrap();
        let ttl = store.lock_ttl();
        let cache = Arc::clone(store.cache());

        let err = store
            .with_session_lock("s1", |mut locked| async move {
                tokio::time::sleep(ttl + Duration::from_millis(1)).await;
                cache
                    .set(&lock_key("s1"), "other".into(), ttl)
                    .await
                    .unwrap();
                let mut next = locked.session().clone();
                next.seat_second("bob".into(), Utc::now())?;
                locked.save(next).await
            })
            .await
            .unwrap_err();
        assert!(err.is_concurrency());
        assert_eq!(store.get("s1").await.unwrap().unwrap().players.len(), 1);
        // The newer holder keeps its lease.
        assert_eq!(
            store.cache().get(&lock_key("s1")).await.unwrap().as_deref(),
            Some("other")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_after_lease_lapse_is_refused() {
        let store = store();
        store.insert_new(&session("s1", "ABC123")).await.unwrap();
        let ttl = store.lock_ttl();

        let err = store
            .with_session_lock("s1", |locked| async move {
                tokio::time::sleep(ttl + Duration::from_millis(1)).await;
                locked.evict().await.map(|_| ())
            })
            .await
            .unwrap_err();
        assert!(err.is_concurrency());
        assert!(store.get("s1").await.unwrap().is_some());
        assert_eq!(
            store.resolve_code("ABC123").await.unwrap().as_deref(),
            Some("s1")
        );
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let err = store()
            .with_session_lock("nope", |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
