//! Cache and lock provider.
//!
//! Holds the hot copy of every live session, the join-code index, the
//! per-session lock leases and the pub/sub topic used to relay events.

mod lease;
mod memory;

pub use lease::{LeaseGuard, LeaseToken, release, try_acquire};
pub use memory::MemoryCache;

use std::time::Duration;

use async_trait::async_trait;
use derive_more::{Display, Error};
use tokio::sync::broadcast;
use tracing::instrument;

/// Cache error with location tracking.
#[derive(Debug, Clone, Display, Error)]
#[display("Cache error: {} at {}:{}", message, file, line)]
pub struct CacheError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl CacheError {
    /// Creates a new cache error with caller location tracking.
    #[track_caller]
    #[instrument(skip(message))]
    pub fn new(message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message: message.into(),
            line: loc.line(),
            file: loc.file(),
        }
    }
}

/// Key-value cache with expiry, conditional writes and pub/sub.
#[async_trait]
pub trait SessionCache: Send + Sync + 'static {
    /// Value under `key`, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores `value` under `key` for `ttl`, replacing any previous value.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Removes `key`. Returns true if a live value was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Stores `value` only if `key` holds no live value. Atomic.
    async fn set_if_absent(&self, key: &str, value: String, ttl: Duration)
    -> Result<bool, CacheError>;

    /// Removes `key` only if it currently holds `expected`. Atomic.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, CacheError>;

    /// Publishes `payload` on `topic`. Returns the number of subscribers reached.
    async fn publish(&self, topic: &str, payload: String) -> Result<usize, CacheError>;

    /// Subscribes to `topic`.
    async fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<String>, CacheError>;
}
