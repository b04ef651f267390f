//! Inbound client commands.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use toroid_rules::{MoveKind, Position};

use crate::session::SessionId;

/// Move as submitted by a client. Seat, sequence and timestamp are
/// filled in by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MoveRequest {
    /// `place` or `skip`.
    pub kind: MoveKind,
    /// Target cell. Wrapped onto the board, ignored for skips.
    #[serde(default)]
    pub position: Option<Position>,
}

/// A command sent by a client over the event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Open a new session and take seat one.
    CreateGame,
    /// Take seat two of a waiting session, by id or join code.
    #[serde(rename_all = "camelCase")]
    JoinGame {
        /// Session id.
        #[serde(default)]
        session_id: Option<SessionId>,
        /// Join code, case insensitive.
        #[serde(default)]
        code: Option<String>,
    },
    /// Apply a move.
    #[serde(rename_all = "camelCase")]
    MakeMove {
        /// Target session.
        session_id: SessionId,
        /// The move.
        #[serde(rename = "move")]
        mv: MoveRequest,
        /// Sequence the client last saw. Stale values are rejected.
        #[serde(default)]
        expected_sequence: Option<u64>,
    },
    /// Give up the rest of the turn.
    #[serde(rename_all = "camelCase")]
    EndTurn {
        /// Target session.
        session_id: SessionId,
        /// Sequence the client last saw.
        #[serde(default)]
        expected_sequence: Option<u64>,
    },
    /// Resume a session after a dropped connection.
    #[serde(rename_all = "camelCase")]
    Reconnect {
        /// Session to resume.
        session_id: SessionId,
    },
    /// Ask for the current state.
    #[serde(rename_all = "camelCase")]
    GetState {
        /// Session to read.
        session_id: SessionId,
    },
}

impl ClientCommand {
    /// Command name as it appears in the `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateGame => "create_game",
            Self::JoinGame { .. } => "join_game",
            Self::MakeMove { .. } => "make_move",
            Self::EndTurn { .. } => "end_turn",
            Self::Reconnect { .. } => "reconnect",
            Self::GetState { .. } => "get_state",
        }
    }

    /// Session the command targets, if it names one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::CreateGame => None,
            Self::JoinGame { session_id, .. } => session_id.as_deref(),
            Self::MakeMove { session_id, .. }
            | Self::EndTurn { session_id, .. }
            | Self::Reconnect { session_id }
            | Self::GetState { session_id } => Some(session_id),
        }
    }
}
