//! First-class move types.
//!
//! Moves are domain events: they are validated before application,
//! recorded in the move log and replayed by history consumers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::{Position, Seat};

/// What a move does to the board.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MoveKind {
    /// Put a piece on an empty cell.
    Place,
    /// Ownership flip caused by a capture. Produced by the engine only.
    Replace,
    /// Give up the rest of the turn.
    Skip,
}

/// A single move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Move {
    /// What the move does.
    pub kind: MoveKind,
    /// Target cell. Ignored for [`MoveKind::Skip`].
    pub position: Position,
    /// Acting seat.
    pub player: Seat,
    /// Position of this move in the game's move order.
    pub sequence: u64,
    /// Wall-clock time the move was submitted, in Unix milliseconds.
    /// Recorded only; the rules never read it.
    pub timestamp_ms: i64,
}

impl Move {
    /// A placement.
    pub fn place(player: Seat, position: Position, sequence: u64, timestamp_ms: i64) -> Self {
        Self {
            kind: MoveKind::Place,
            position,
            player,
            sequence,
            timestamp_ms,
        }
    }

    /// A turn skip.
    pub fn skip(player: Seat, sequence: u64, timestamp_ms: i64) -> Self {
        Self {
            kind: MoveKind::Skip,
            position: Position::new(0, 0),
            player,
            sequence,
            timestamp_ms,
        }
    }
}

impl std::fmt::Display for Move {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            MoveKind::Skip => write!(f, "#{} {} skip", self.sequence, self.player),
            kind => write!(
                f,
                "#{} {} {} {}",
                self.sequence,
                self.player,
                kind.as_ref(),
                self.position
            ),
        }
    }
}

/// Why a move was rejected.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum MoveError {
    /// The board is full.
    #[display("Game is already over")]
    GameOver,

    /// Another seat is to move.
    #[display("It's not {}'s turn", _0)]
    NotYourTurn(Seat),

    /// The wrapped target cell already has a piece.
    #[display("Cell {} is already occupied", _0)]
    CellOccupied(Position),

    /// Clients cannot submit capture flips.
    #[display("Replace moves are produced by captures and cannot be submitted")]
    ReplaceNotSubmittable,

    /// The move was built against an older state.
    #[display("Stale move: expected sequence {}, got {}", expected, actual)]
    StaleSequence {
        /// Sequence the state expects next.
        expected: u64,
        /// Sequence the move carried.
        actual: u64,
    },

    /// Capture propagation kept flipping past the pass cap.
    #[display("Capture propagation did not settle within {} passes", _0)]
    CaptureDidNotSettle(usize),

    /// A postcondition failed.
    #[display("Invariant violation: {}", _0)]
    InvariantViolation(String),
}

impl std::error::Error for MoveError {}

impl MoveError {
    /// True for errors that indicate an engine bug rather than a bad request.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            MoveError::CaptureDidNotSettle(_) | MoveError::InvariantViolation(_)
        )
    }
}
