//! Live connections by player.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, instrument, warn};

use crate::events::{Delivery, EventEnvelope, EventSink};
use crate::session::{PlayerId, SessionId};

/// Envelopes buffered per connection before new ones are dropped.
pub const OUTBOUND_CAPACITY: usize = 64;

/// Identifies one connection of a player.
pub type ConnectionId = u64;

/// Open connections and seated sessions of one player.
#[derive(Debug, Default)]
struct PlayerEntry {
    connections: HashMap<ConnectionId, mpsc::Sender<EventEnvelope>>,
    sessions: BTreeSet<SessionId>,
}

/// Routes envelopes to the connections of each player.
///
/// A player may hold several connections at once (tabs, a reconnect
/// racing the old socket's close); each receives every delivery. The
/// sessions a player is seated in are tracked per player, so whichever
/// connection closes last sees all of them.
#[derive(Debug, Clone, Default)]
pub struct ConnectionHub {
    players: Arc<Mutex<HashMap<PlayerId, PlayerEntry>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionHub {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection for `player`.
    #[instrument(skip(self))]
    pub async fn register(&self, player: &str) -> (ConnectionId, mpsc::Receiver<EventEnvelope>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        self.players
            .lock()
            .await
            .entry(player.to_string())
            .or_default()
            .connections
            .insert(id, tx);
        debug!(connection_id = id, "Connection registered");
        (id, rx)
    }

    /// Removes a connection.
    ///
    /// Returns `None` while the player has other connections left. When the
    /// last one goes, returns every session the player was tracked in.
    #[instrument(skip(self))]
    pub async fn unregister(
        &self,
        player: &str,
        connection: ConnectionId,
    ) -> Option<BTreeSet<SessionId>> {
        let mut players = self.players.lock().await;
        let entry = players.get_mut(player)?;
        entry.connections.remove(&connection);
        if entry.connections.is_empty() {
            players.remove(player).map(|entry| entry.sessions)
        } else {
            None
        }
    }

    /// Records that `player` is seated in `session`. Ignored once the
    /// player has no connections.
    pub async fn track_session(&self, player: &str, session: &str) {
        if let Some(entry) = self.players.lock().await.get_mut(player) {
            entry.sessions.insert(session.to_string());
        }
    }

    /// Sessions tracked for `player`.
    pub async fn sessions_of(&self, player: &str) -> BTreeSet<SessionId> {
        self.players
            .lock()
            .await
            .get(player)
            .map(|entry| entry.sessions.clone())
            .unwrap_or_default()
    }

    /// True while `player` has at least one connection.
    pub async fn is_connected(&self, player: &str) -> bool {
        self.players.lock().await.contains_key(player)
    }

    /// Sends to a single connection. Returns false if it is gone or full.
    pub async fn send_to_connection(
        &self,
        player: &str,
        connection: ConnectionId,
        envelope: EventEnvelope,
    ) -> bool {
        let players = self.players.lock().await;
        match players.get(player).and_then(|e| e.connections.get(&connection)) {
            Some(tx) => offer(tx, envelope, player),
            None => false,
        }
    }
}

fn offer(tx: &mpsc::Sender<EventEnvelope>, envelope: EventEnvelope, player: &str) -> bool {
    match tx.try_send(envelope) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(env)) => {
            warn!(player_id = player, event_id = %env.event_id, "Outbound queue full, dropping event");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

#[async_trait]
impl EventSink for ConnectionHub {
    async fn deliver(&self, delivery: Delivery) {
        let players = self.players.lock().await;
        for player in &delivery.recipients {
            let Some(entry) = players.get(player) else {
                debug!(player_id = %player, "Recipient offline");
                continue;
            };
            for tx in entry.connections.values() {
                offer(tx, delivery.envelope.clone(), player);
            }
        }
    }
}
