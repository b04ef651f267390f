//! Contract-based move validation.
//!
//! Preconditions decide whether a move may be applied; postconditions
//! check the invariants every transition must keep.

use tracing::{instrument, warn};

use crate::action::{Move, MoveError, MoveKind};
use crate::engine::PLACE_OPERATIONS_PER_TURN;
use crate::types::{GameState, Scores, Seat};

// ─────────────────────────────────────────────────────────────
//  Move Preconditions
// ─────────────────────────────────────────────────────────────

/// Precondition: the board still has an empty cell.
pub struct GameNotOver;

impl GameNotOver {
    /// Checks the precondition.
    pub fn check(state: &GameState) -> Result<(), MoveError> {
        if state.is_over() {
            Err(MoveError::GameOver)
        } else {
            Ok(())
        }
    }
}

/// Precondition: `player` is the seat to move.
pub struct PlayersTurn;

impl PlayersTurn {
    /// Checks the precondition.
    pub fn check(state: &GameState, player: Seat) -> Result<(), MoveError> {
        if state.current_player() != player {
            Err(MoveError::NotYourTurn(player))
        } else {
            Ok(())
        }
    }
}

/// Guard for callers that track the sequence a client last saw.
///
/// Not part of [`LegalMove`]: the engine numbers recorded moves itself
/// and ignores the sequence a submitted move carries.
pub struct SequenceMatches;

impl SequenceMatches {
    /// Rejects `expected` unless it is the state's next sequence.
    pub fn check(state: &GameState, expected: u64) -> Result<(), MoveError> {
        if expected != state.sequence() {
            Err(MoveError::StaleSequence {
                expected: state.sequence(),
                actual: expected,
            })
        } else {
            Ok(())
        }
    }
}

/// Precondition: placements target an empty cell after wrapping;
/// replace moves are never accepted from outside the engine.
pub struct TargetAvailable;

impl TargetAvailable {
    /// Checks the precondition.
    pub fn check(state: &GameState, mv: &Move) -> Result<(), MoveError> {
        match mv.kind {
            MoveKind::Replace => Err(MoveError::ReplaceNotSubmittable),
            MoveKind::Skip => Ok(()),
            MoveKind::Place => {
                let board = state.board();
                if board.is_free(mv.position) {
                    Ok(())
                } else {
                    Err(MoveError::CellOccupied(board.wrap(mv.position)))
                }
            }
        }
    }
}

/// Composite precondition for a submitted move.
pub struct LegalMove;

impl LegalMove {
    /// Validates all preconditions.
    #[instrument(skip(state), fields(sequence = state.sequence()))]
    pub fn check(state: &GameState, mv: &Move, player: Seat) -> Result<(), MoveError> {
        GameNotOver::check(state)?;
        PlayersTurn::check(state, player)?;
        TargetAvailable::check(state, mv)?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
//  Postconditions
// ─────────────────────────────────────────────────────────────

/// Invariant: scores equal a fresh count of the board.
pub struct ScoresMatchBoard;

impl ScoresMatchBoard {
    /// True if the invariant holds.
    pub fn holds(state: &GameState) -> bool {
        let fresh = Scores::tally(state.board());
        let valid = fresh == state.scores();
        if !valid {
            warn!(?fresh, stored = ?state.scores(), "Score drift detected");
        }
        valid
    }
}

/// Invariant: pieces are never removed. A placement adds exactly one
/// occupied cell, every other move leaves the count unchanged.
pub struct OccupancyGrows;

impl OccupancyGrows {
    /// True if the invariant holds.
    pub fn holds(before: &GameState, after: &GameState, kind: MoveKind) -> bool {
        let expected = match kind {
            MoveKind::Place => before.board().occupied() + 1,
            MoveKind::Replace | MoveKind::Skip => before.board().occupied(),
        };
        let valid = after.board().occupied() == expected;
        if !valid {
            warn!(expected, actual = after.board().occupied(), "Occupancy invariant violated");
        }
        valid
    }
}

/// Invariant: a live turn always has between one and two placements left.
pub struct TurnBudget;

impl TurnBudget {
    /// True if the invariant holds.
    pub fn holds(state: &GameState) -> bool {
        let left = state.turn().place_operations_left;
        (1..=PLACE_OPERATIONS_PER_TURN).contains(&left)
    }
}

/// Contract for applying a move.
pub struct MoveContract;

impl MoveContract {
    /// Preconditions (see [`LegalMove`]).
    pub fn pre(state: &GameState, mv: &Move, player: Seat) -> Result<(), MoveError> {
        LegalMove::check(state, mv, player)
    }

    /// Postconditions over a completed transition.
    pub fn post(before: &GameState, after: &GameState, kind: MoveKind) -> Result<(), MoveError> {
        let mut violations = Vec::new();
        if !ScoresMatchBoard::holds(after) {
            violations.push("scores differ from board");
        }
        if !OccupancyGrows::holds(before, after, kind) {
            violations.push("occupied cell count changed unexpectedly");
        }
        if !TurnBudget::holds(after) {
            violations.push("turn budget out of range");
        }
        if after.sequence() <= before.sequence() {
            violations.push("sequence did not advance");
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(MoveError::InvariantViolation(format!(
                "Postcondition failed: {}",
                violations.join("; ")
            )))
        }
    }
}
