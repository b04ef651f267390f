//! Ownership-checked lock leases.
//!
//! A lease is a cache key holding a random token, written with
//! set-if-absent and an expiry. Release deletes the key only if it still
//! holds the caller's token, so a holder whose lease already lapsed can't
//! free somebody else's.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::cache::{CacheError, SessionCache};

/// Proof of holding a lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub struct LeaseToken(String);

impl LeaseToken {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Token value as stored in the cache.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Tries to take the lease on `key` for `ttl`. Never waits.
#[instrument(skip(cache), fields(ttl_ms = ttl.as_millis() as u64))]
pub async fn try_acquire(
    cache: &dyn SessionCache,
    key: &str,
    ttl: Duration,
) -> Result<Option<LeaseToken>, CacheError> {
    let token = LeaseToken::generate();
    if cache.set_if_absent(key, token.0.clone(), ttl).await? {
        debug!(token = %token, "Lease acquired");
        Ok(Some(token))
    } else {
        debug!("Lease held elsewhere");
        Ok(None)
    }
}

/// Releases the lease on `key` if `token` still owns it.
#[instrument(skip(cache))]
pub async fn release(
    cache: &dyn SessionCache,
    key: &str,
    token: &LeaseToken,
) -> Result<bool, CacheError> {
    let released = cache.compare_and_delete(key, token.as_str()).await?;
    if !released {
        warn!("Lease lapsed before release");
    }
    Ok(released)
}

/// Held lease that frees itself.
///
/// Call [`LeaseGuard::release`] on normal exit. If the guard is dropped
/// while still holding the lease (the holder panicked or its future was
/// cancelled) the release is spawned on the current runtime.
pub struct LeaseGuard {
    cache: Arc<dyn SessionCache>,
    key: String,
    token: Option<LeaseToken>,
}

impl std::fmt::Debug for LeaseGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseGuard")
            .field("key", &self.key)
            .field("token", &self.token)
            .finish()
    }
}

impl LeaseGuard {
    /// Tries to take the lease on `key`.
    pub async fn acquire(
        cache: Arc<dyn SessionCache>,
        key: impl Into<String>,
        ttl: Duration,
    ) -> Result<Option<Self>, CacheError> {
        let key = key.into();
        let token = try_acquire(cache.as_ref(), &key, ttl).await?;
        Ok(token.map(|token| Self {
            cache,
            key,
            token: Some(token),
        }))
    }

    /// Key the lease guards.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Token while the guard still holds the lease.
    pub fn token(&self) -> Option<&LeaseToken> {
        self.token.as_ref()
    }

    /// Releases the lease now.
    pub async fn release(mut self) -> Result<bool, CacheError> {
        match self.token.take() {
            Some(token) => release(self.cache.as_ref(), &self.key, &token).await,
            None => Ok(false),
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, "No runtime to release lease, leaving it to expire");
            return;
        };
        let cache = Arc::clone(&self.cache);
        let key = std::mem::take(&mut self.key);
        handle.spawn(async move {
            if let Err(e) = release(cache.as_ref(), &key, &token).await {
                warn!(key = %key, error = %e, "Deferred lease release failed");
            }
        });
    }
}
