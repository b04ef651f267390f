//! Background sweep of idle sessions.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::MemoryCache;
use crate::lifecycle::SessionLifecycle;

/// Periodically expires sessions idle past their deadline.
#[derive(Debug)]
pub struct SessionReaper {
    lifecycle: SessionLifecycle,
    interval: Duration,
    cache: Option<MemoryCache>,
    cancel: CancellationToken,
}

impl SessionReaper {
    /// Creates a reaper running every `interval` until `cancel` fires.
    pub fn new(lifecycle: SessionLifecycle, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            lifecycle,
            interval,
            cache: None,
            cancel,
        }
    }

    /// Also purges expired entries from `cache` on every sweep.
    pub fn with_memory_cache(mut self, cache: MemoryCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Runs until cancelled.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "Session reaper started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {
                    self.sweep().await;
                }
            }
        }
        info!("Session reaper stopped");
    }

    /// One sweep. Returns the number of sessions expired.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> usize {
        let reaped = match self.lifecycle.reap_idle(Utc::now()).await {
            Ok(reaped) => reaped,
            Err(e) => {
                warn!(error = %e, "Idle sweep failed");
                0
            }
        };
        if let Some(cache) = &self.cache {
            cache.purge_expired().await;
        }
        debug!(reaped, "Sweep complete");
        reaped
    }
}
