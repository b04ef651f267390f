//! In-process cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};
use tokio::time::Instant;
use tracing::{debug, instrument, trace};

use crate::cache::{CacheError, SessionCache};

/// Messages buffered per topic before slow subscribers start lagging.
const TOPIC_CAPACITY: usize = 256;

#[derive(Debug)]
struct Entry {
    value: String,
    deadline: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.deadline
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    topics: HashMap<String, broadcast::Sender<String>>,
}

/// [`SessionCache`] backed by a mutex-guarded map.
///
/// Deadlines follow the tokio clock, so paused-time tests control expiry.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every expired entry. Returns how many were removed.
    #[instrument(skip(self))]
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.is_live(now));
        let purged = before - inner.entries.len();
        debug!(purged, "Purged expired cache entries");
        purged
    }
}

#[async_trait]
impl SessionCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        match inner.entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                inner.entries.remove(key);
                trace!(key, "Entry expired");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let deadline = Instant::now() + ttl;
        let mut inner = self.inner.lock().await;
        inner
            .entries
            .insert(key.to_string(), Entry { value, deadline });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        Ok(inner
            .entries
            .remove(key)
            .is_some_and(|entry| entry.is_live(now)))
    }

    #[instrument(skip(self, value, ttl))]
    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        if inner.entries.get(key).is_some_and(|e| e.is_live(now)) {
            trace!("Key held");
            return Ok(false);
        }
        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                deadline: now + ttl,
            },
        );
        Ok(true)
    }

    #[instrument(skip(self, expected))]
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let matches = inner
            .entries
            .get(key)
            .is_some_and(|e| e.is_live(now) && e.value == expected);
        if matches {
            inner.entries.remove(key);
        } else {
            trace!("Value changed or expired, left untouched");
        }
        Ok(matches)
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<usize, CacheError> {
        let inner = self.inner.lock().await;
        // A send error only means nobody is subscribed.
        Ok(inner
            .topics
            .get(topic)
            .and_then(|tx| tx.send(payload).ok())
            .unwrap_or(0))
    }

    async fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<String>, CacheError> {
        let mut inner = self.inner.lock().await;
        let tx = inner
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0);
        Ok(tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v".to_string(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent_respects_live_value() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_millis(100);
        assert!(cache.set_if_absent("lock", "a".into(), ttl).await.unwrap());
        assert!(!cache.set_if_absent("lock", "b".into(), ttl).await.unwrap());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(cache.set_if_absent("lock", "b".into(), ttl).await.unwrap());
        assert_eq!(cache.get("lock").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_compare_and_delete_checks_value() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(5);
        cache.set("lock", "mine".into(), ttl).await.unwrap();
        assert!(!cache.compare_and_delete("lock", "theirs").await.unwrap());
        assert!(cache.compare_and_delete("lock", "mine").await.unwrap());
        assert_eq!(cache.get("lock").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let cache = MemoryCache::new();
        assert_eq!(cache.publish("t", "lost".into()).await.unwrap(), 0);

        let mut rx = cache.subscribe("t").await.unwrap();
        assert_eq!(cache.publish("t", "hello".into()).await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = MemoryCache::new();
        cache.set("a", "1".into(), Duration::from_secs(1)).await.unwrap();
        cache.set("b", "2".into(), Duration::from_secs(60)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired().await, 1);
        assert!(cache.get("b").await.unwrap().is_some());
    }
}
