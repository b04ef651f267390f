//! Toroid server - multiplayer sessions for the toroidal capture game.
//!
//! Sessions live in a shared cache guarded by a per-session lease, so any
//! number of server processes can serve the same game. Metadata and the
//! full move log are persisted to a durable store.
//!
//! # Architecture
//!
//! - **Store**: cached session state plus the lease lock
//! - **Records**: durable session metadata and move log (SQLite or memory)
//! - **Lifecycle**: create, join, move, disconnect and expiry
//! - **Channel**: WebSocket commands in, enveloped events out
//!
//! # Example
//!
//! ```no_run
//! use toroid_server::{Server, ServerConfig, StorageBackend};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ServerConfig::default().with_storage(StorageBackend::Memory);
//! let server = Server::build(config).await?;
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! server.serve(listener).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Private module declarations
mod cache;
mod channel;
mod config;
mod db;
mod error;
mod events;
mod http;
mod lifecycle;
mod protocol;
mod reaper;
mod server;
mod session;
mod store;

// Crate-level exports - Cache and leases
pub use cache::{
    CacheError, LeaseGuard, LeaseToken, MemoryCache, SessionCache, release, try_acquire,
};

// Crate-level exports - Event channel
pub use channel::{
    CacheRelay, ConnectionContext, ConnectionHub, ConnectionId, EVENTS_TOPIC, EventChannel,
    OUTBOUND_CAPACITY,
};

// Crate-level exports - Configuration
pub use config::{ConfigError, ENV_DATABASE, ENV_HOST, ENV_PORT, ServerConfig, StorageBackend};

// Crate-level exports - Durable records
pub use db::{
    DbError, DbErrorKind, MIGRATIONS, MemoryRecords, MoveLogEntry, NewMoveLogEntry,
    NewSessionRecord, SessionChanges, SessionRecord, SessionRecords, SessionRepository,
};

// Crate-level exports - Errors
pub use error::{SessionError, SessionErrorKind, ValidationError};

// Crate-level exports - Events and commands
pub use events::{Delivery, EventEnvelope, EventSink, ServerEvent};
pub use protocol::{ClientCommand, MoveRequest};

// Crate-level exports - HTTP surface
pub use http::{ConnectParams, router, status_for};

// Crate-level exports - Lifecycle
pub use lifecycle::{
    LifecycleSettings, MAX_CODE_ATTEMPTS, SessionLifecycle, generate_code, score_trail,
};
pub use reaper::SessionReaper;
pub use server::Server;

// Crate-level exports - Sessions
pub use session::{GameSession, MAX_PLAYERS, PlayerId, SeatedPlayer, SessionId, SessionStatus};
pub use store::{LockedSession, SessionStore, code_key, lock_key, session_key};
