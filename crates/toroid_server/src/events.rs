//! Outbound events.
//!
//! Every event travels inside an [`EventEnvelope`] carrying a unique id
//! and a timestamp so clients can deduplicate and order deliveries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use toroid_rules::{GameState, Move, MoveError, Position, Scores, Seat};
use uuid::Uuid;

use crate::error::{SessionError, SessionErrorKind, ValidationError};
use crate::session::{GameSession, PlayerId, SessionId, SessionStatus};

/// Something the server tells clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent once when a connection opens.
    #[serde(rename_all = "camelCase")]
    Connected {
        /// Identity the connection acts as.
        player_id: PlayerId,
    },
    /// A session was created for the recipient.
    #[serde(rename_all = "camelCase")]
    GameCreated {
        /// New session.
        session_id: SessionId,
        /// Code the opponent joins with.
        code: String,
        /// Creator.
        player_id: PlayerId,
        /// Always 1.
        player_number: u8,
    },
    /// The recipient took a seat.
    #[serde(rename_all = "camelCase")]
    GameJoined {
        /// Joined session.
        session_id: SessionId,
        /// Status after joining.
        status: SessionStatus,
        /// Seat taken.
        player_number: u8,
    },
    /// Both seats are filled.
    #[serde(rename_all = "camelCase")]
    GameStarted {
        /// Started session.
        session_id: SessionId,
        /// Initial state.
        state: GameState,
        /// Seat to move.
        current_player: Seat,
    },
    /// A move was applied.
    #[serde(rename_all = "camelCase")]
    GameStateUpdated {
        /// Session.
        session_id: SessionId,
        /// State after the move.
        state: GameState,
        /// Seat to move next.
        current_player: Seat,
        /// Recorded moves, captures included.
        applied: Vec<Move>,
        /// Cells flipped by the move.
        captured: Vec<Position>,
    },
    /// The board is full.
    #[serde(rename_all = "camelCase")]
    GameOver {
        /// Session.
        session_id: SessionId,
        /// Final state.
        state: GameState,
        /// Winner, `None` on a tie.
        winner: Option<Seat>,
        /// Final scores.
        scores: Scores,
    },
    /// A player ended their turn early.
    #[serde(rename_all = "camelCase")]
    TurnEnded {
        /// Session.
        session_id: SessionId,
        /// State after the turn passed.
        state: GameState,
        /// Seat to move.
        next_player: Seat,
    },
    /// A seated player dropped.
    #[serde(rename_all = "camelCase")]
    PlayerDisconnected {
        /// Session.
        session_id: SessionId,
        /// Seat that dropped.
        player_number: u8,
        /// Seconds left to reconnect.
        grace_seconds: u64,
    },
    /// A dropped player is back.
    #[serde(rename_all = "camelCase")]
    PlayerReconnected {
        /// Session.
        session_id: SessionId,
        /// Seat that returned.
        player_number: u8,
        /// Current state.
        state: GameState,
    },
    /// The session was reclaimed.
    #[serde(rename_all = "camelCase")]
    GameExpired {
        /// Session.
        session_id: SessionId,
        /// Why, e.g. `grace_elapsed` or `idle`.
        reason: String,
    },
    /// Read-only snapshot answering `get_state`.
    #[serde(rename_all = "camelCase")]
    SessionSnapshot {
        /// Session as stored.
        session: GameSession,
    },
    /// A command failed. Only sent to the connection that issued it.
    #[serde(rename_all = "camelCase")]
    Error {
        /// Stable error code.
        code: String,
        /// Human readable message.
        message: String,
        /// Extra structured detail.
        details: Option<serde_json::Value>,
    },
}

impl ServerEvent {
    /// Error event for `err`, without internal details.
    pub fn from_error(err: &SessionError) -> Self {
        let details = match &err.kind {
            SessionErrorKind::Validation(ValidationError::Rule(MoveError::StaleSequence {
                expected,
                actual,
            })) => Some(json!({ "expectedSequence": expected, "actualSequence": actual })),
            SessionErrorKind::Concurrency(session_id) => {
                Some(json!({ "sessionId": session_id, "retryable": true }))
            }
            _ => None,
        };
        Self::Error {
            code: err.kind.code().to_string(),
            message: err.kind.public_message(),
            details,
        }
    }

    /// Event name as it appears in the `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::GameCreated { .. } => "game_created",
            Self::GameJoined { .. } => "game_joined",
            Self::GameStarted { .. } => "game_started",
            Self::GameStateUpdated { .. } => "game_state_updated",
            Self::GameOver { .. } => "game_over",
            Self::TurnEnded { .. } => "turn_ended",
            Self::PlayerDisconnected { .. } => "player_disconnected",
            Self::PlayerReconnected { .. } => "player_reconnected",
            Self::GameExpired { .. } => "game_expired",
            Self::SessionSnapshot { .. } => "session_snapshot",
            Self::Error { .. } => "error",
        }
    }
}

/// An event stamped for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Unique per event.
    pub event_id: Uuid,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
    /// Payload.
    pub event: ServerEvent,
}

impl EventEnvelope {
    /// Wraps `event` with a fresh id and the current time.
    pub fn new(event: ServerEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// An envelope addressed to specific players.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    /// Players to receive the envelope.
    pub recipients: Vec<PlayerId>,
    /// The envelope.
    pub envelope: EventEnvelope,
}

impl Delivery {
    /// Stamps `event` for `recipients`.
    pub fn to(recipients: Vec<PlayerId>, event: ServerEvent) -> Self {
        Self {
            recipients,
            envelope: EventEnvelope::new(event),
        }
    }
}

/// Where the lifecycle sends outbound events.
///
/// Delivery is best effort: a recipient without a live connection just
/// misses the event and catches up from the next snapshot.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    /// Delivers to every listed recipient.
    async fn deliver(&self, delivery: Delivery);
}
