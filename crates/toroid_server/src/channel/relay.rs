//! Event relay over cache pub/sub.
//!
//! With several server processes sharing a cache, the lifecycle of one
//! process publishes deliveries and every process forwards them to the
//! players connected locally.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::cache::{CacheError, SessionCache};
use crate::channel::ConnectionHub;
use crate::events::{Delivery, EventSink};

/// Pub/sub topic carrying deliveries.
pub const EVENTS_TOPIC: &str = "toroid:events";

/// [`EventSink`] publishing deliveries to the cache.
#[derive(Clone)]
pub struct CacheRelay {
    cache: Arc<dyn SessionCache>,
}

impl std::fmt::Debug for CacheRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRelay").finish_non_exhaustive()
    }
}

impl CacheRelay {
    /// Subscribes `hub` to the events topic and returns the publishing
    /// sink plus the forwarding task.
    #[instrument(skip_all)]
    pub async fn start(
        cache: Arc<dyn SessionCache>,
        hub: ConnectionHub,
        cancel: CancellationToken,
    ) -> Result<(Self, JoinHandle<()>), CacheError> {
        let mut rx = cache.subscribe(EVENTS_TOPIC).await?;
        let task = tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = rx.recv() => received,
                };
                match payload {
                    Ok(json) => match serde_json::from_str::<Delivery>(&json) {
                        Ok(delivery) => hub.deliver(delivery).await,
                        Err(e) => warn!(error = %e, "Dropping malformed delivery"),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Relay lagged, deliveries lost");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Relay stopped");
        });
        Ok((Self { cache }, task))
    }
}

#[async_trait]
impl EventSink for CacheRelay {
    async fn deliver(&self, delivery: Delivery) {
        let json = match serde_json::to_string(&delivery) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to serialize delivery");
                return;
            }
        };
        if let Err(e) = self.cache.publish(EVENTS_TOPIC, json).await {
            error!(error = %e, "Failed to publish delivery");
        }
    }
}
