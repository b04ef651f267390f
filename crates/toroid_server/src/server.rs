//! Service wiring.

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::cache::{MemoryCache, SessionCache};
use crate::channel::{CacheRelay, ConnectionHub, EventChannel};
use crate::config::{ServerConfig, StorageBackend};
use crate::db::{MemoryRecords, SessionRecords, SessionRepository};
use crate::error::SessionError;
use crate::http;
use crate::lifecycle::{LifecycleSettings, SessionLifecycle};
use crate::reaper::SessionReaper;
use crate::store::SessionStore;

/// Every service of a running server, constructed once at startup.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    cache: MemoryCache,
    channel: EventChannel,
    cancel: CancellationToken,
    relay: JoinHandle<()>,
}

impl Server {
    /// Opens storage and wires the services together.
    #[instrument(skip(config), fields(storage = %config.storage()))]
    pub async fn build(config: ServerConfig) -> Result<Self, SessionError> {
        let records: Arc<dyn SessionRecords> = match config.storage() {
            StorageBackend::Sqlite => {
                let path = config.database_path().clone();
                let repo = tokio::task::spawn_blocking(move || SessionRepository::open(&path))
                    .await
                    .map_err(|e| SessionError::storage(e.to_string()))??;
                Arc::new(repo)
            }
            StorageBackend::Memory => Arc::new(MemoryRecords::new()),
        };

        let cache = MemoryCache::new();
        let shared: Arc<dyn SessionCache> = Arc::new(cache.clone());
        let hub = ConnectionHub::new();
        let cancel = CancellationToken::new();
        let (relay_sink, relay) =
            CacheRelay::start(Arc::clone(&shared), hub.clone(), cancel.child_token()).await?;

        let store = SessionStore::new(shared, config.lock_ttl(), config.session_ttl());
        let lifecycle = SessionLifecycle::new(
            store,
            records,
            Arc::new(relay_sink),
            LifecycleSettings::from(&config),
        );
        let channel = EventChannel::new(lifecycle, hub);
        info!("Services ready");

        Ok(Self {
            config,
            cache,
            channel,
            cancel,
            relay,
        })
    }

    /// Router serving this server.
    pub fn router(&self) -> Router {
        http::router(self.channel.clone())
    }

    /// The event channel.
    pub fn channel(&self) -> &EventChannel {
        &self.channel
    }

    /// The lifecycle.
    pub fn lifecycle(&self) -> &SessionLifecycle {
        self.channel.lifecycle()
    }

    /// Token that stops the server's background tasks.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Serves on `listener` until ctrl-c or cancellation.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let reaper = SessionReaper::new(
            self.lifecycle().clone(),
            self.config.reaper_interval(),
            self.cancel.child_token(),
        )
        .with_memory_cache(self.cache.clone());
        let reaper = tokio::spawn(reaper.run());

        let app = self.router();
        let cancel = self.cancel.clone();
        info!(addr = ?listener.local_addr().ok(), "Server listening");
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
                    _ = cancel.cancelled() => {}
                }
            })
            .await;

        self.cancel.cancel();
        let _ = reaper.await;
        let _ = self.relay.await;
        info!("Server stopped");
        result
    }
}
