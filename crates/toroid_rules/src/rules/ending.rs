//! End-of-game detection.

use crate::types::{Board, Outcome, Scores};

/// The game ends exactly when no empty cell remains.
pub fn is_finished(board: &Board) -> bool {
    board.is_full()
}

/// Outcome of a finished board, `None` while cells remain empty.
///
/// The winner is the seat with the strictly higher score.
pub fn outcome(board: &Board) -> Option<Outcome> {
    if !is_finished(board) {
        return None;
    }
    let scores = Scores::tally(board);
    Some(Outcome {
        winner: scores.leader(),
        scores,
    })
}
