//! Capture propagation.
//!
//! After a placement, every opponent cell with at least
//! [`CAPTURE_THRESHOLD`] of the mover's pieces in its wrapped
//! 8-neighbourhood flips to the mover. Flips can enable further flips,
//! so propagation runs in passes until a pass flips nothing.
//!
//! Each pass decides its flips against the board as it stood at the
//! start of the pass, then applies them. Only the mover's opponent is
//! ever captured: pieces the mover just placed or flipped are not
//! checked for capture by the opponent within the same move.

use tracing::{debug, instrument, warn};

use crate::action::MoveError;
use crate::types::{Board, Cell, Position, Seat};

/// Neighbours of the mover required to capture a cell.
pub const CAPTURE_THRESHOLD: usize = 5;

/// Boards with at least this many cells use [`CaptureStrategy::Worklist`].
pub const WORKLIST_MIN_CELLS: usize = 1024;

/// How candidate cells are chosen for each pass.
///
/// Both strategies flip exactly the same cells in the same order; the
/// worklist only avoids rescanning cells whose neighbourhood did not
/// change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStrategy {
    /// Every pass examines the whole board.
    FullScan,
    /// The first pass examines the whole board, later passes only the
    /// neighbours of the previous pass's flips.
    Worklist,
}

impl CaptureStrategy {
    /// Strategy used by the engine for a board of this size.
    pub fn for_board(board: &Board) -> Self {
        if board.len() >= WORKLIST_MIN_CELLS {
            CaptureStrategy::Worklist
        } else {
            CaptureStrategy::FullScan
        }
    }
}

/// Maximum number of productive passes.
///
/// Every productive pass flips at least one opponent cell and flips are
/// never undone, so a board can't need more passes than it has cells.
pub fn pass_cap(board: &Board) -> usize {
    board.len()
}

/// Runs capture propagation for `mover` with the engine's default
/// strategy. Returns flipped positions in flip order.
pub fn propagate(board: &mut Board, mover: Seat) -> Result<Vec<Position>, MoveError> {
    propagate_with(board, mover, CaptureStrategy::for_board(board))
}

/// Runs capture propagation with an explicit strategy.
///
/// Within a pass, flips are ordered row-major.
#[instrument(skip(board), fields(width = board.width(), height = board.height()))]
pub fn propagate_with(
    board: &mut Board,
    mover: Seat,
    strategy: CaptureStrategy,
) -> Result<Vec<Position>, MoveError> {
    let victim = Cell::Occupied(mover.opponent());
    let cap = pass_cap(board);
    let mut flipped = Vec::new();
    let mut passes = 0usize;
    let mut candidates: Vec<usize> = (0..board.len()).collect();

    loop {
        let wave: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&idx| {
                board.get_index(idx) == victim
                    && board.neighbours_owned_by(idx, mover) >= CAPTURE_THRESHOLD
            })
            .collect();

        if wave.is_empty() {
            break;
        }

        passes += 1;
        if passes > cap {
            warn!(passes, cap, "Capture propagation exceeded pass cap");
            return Err(MoveError::CaptureDidNotSettle(cap));
        }

        for &idx in &wave {
            board.set_index(idx, Cell::Occupied(mover));
            flipped.push(board.position_of(idx));
        }

        candidates = match strategy {
            CaptureStrategy::FullScan => (0..board.len()).collect(),
            CaptureStrategy::Worklist => {
                let mut next: Vec<usize> =
                    wave.iter().flat_map(|&idx| board.neighbours(idx)).collect();
                next.sort_unstable();
                next.dedup();
                next
            }
        };
    }

    debug!(passes, flips = flipped.len(), "Capture propagation settled");
    Ok(flipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn put(board: &mut Board, seat: Seat, cells: &[(i64, i64)]) {
        for &(x, y) in cells {
            board.set(Position::new(x, y), Cell::Occupied(seat));
        }
    }

    fn random_board(rng: &mut StdRng, width: usize, height: usize) -> Board {
        let mut board = Board::new(width, height).unwrap();
        for idx in 0..board.len() {
            let cell = match rng.gen_range(0..3) {
                0 => Cell::Empty,
                1 => Cell::Occupied(Seat::One),
                _ => Cell::Occupied(Seat::Two),
            };
            board.set_index(idx, cell);
        }
        board
    }

    #[test]
    fn test_five_neighbours_capture() {
        let mut board = Board::new(10, 10).unwrap();
        put(&mut board, Seat::One, &[(0, 0), (0, 1), (0, 2), (1, 0), (1, 2)]);
        put(&mut board, Seat::Two, &[(1, 1)]);

        let flipped = propagate(&mut board, Seat::One).unwrap();
        assert_eq!(flipped, vec![Position::new(1, 1)]);
        assert_eq!(board.get(Position::new(1, 1)), Cell::Occupied(Seat::One));
    }

    #[test]
    fn test_four_neighbours_do_not_capture() {
        let mut board = Board::new(10, 10).unwrap();
        put(&mut board, Seat::One, &[(0, 0), (0, 1), (0, 2), (1, 0)]);
        put(&mut board, Seat::Two, &[(1, 1)]);

        let flipped = propagate(&mut board, Seat::One).unwrap();
        assert!(flipped.is_empty());
        assert_eq!(board.get(Position::new(1, 1)), Cell::Occupied(Seat::Two));
    }

    #[test]
    fn test_capture_counts_wrapped_neighbours() {
        let mut board = Board::new(10, 10).unwrap();
        // All five attackers sit across the edges from (0, 0).
        put(&mut board, Seat::One, &[(9, 9), (9, 0), (9, 1), (0, 9), (1, 9)]);
        put(&mut board, Seat::Two, &[(0, 0)]);

        let flipped = propagate(&mut board, Seat::One).unwrap();
        assert_eq!(flipped, vec![Position::new(0, 0)]);
    }

    #[test]
    fn test_chain_reaction_needs_second_pass() {
        let mut board = Board::new(10, 10).unwrap();
        // (2, 1) has four attackers until (1, 1) flips.
        put(
            &mut board,
            Seat::One,
            &[(0, 0), (0, 1), (0, 2), (1, 0), (1, 2), (2, 0), (3, 1)],
        );
        put(&mut board, Seat::Two, &[(1, 1), (2, 1)]);

        let flipped = propagate(&mut board, Seat::One).unwrap();
        assert_eq!(flipped, vec![Position::new(1, 1), Position::new(2, 1)]);
    }

    #[test]
    fn test_mover_pieces_never_flip() {
        let mut board = Board::new(5, 5).unwrap();
        put(&mut board, Seat::Two, &[(0, 0), (0, 1), (0, 2), (1, 0), (1, 2)]);
        put(&mut board, Seat::One, &[(1, 1)]);

        let flipped = propagate(&mut board, Seat::One).unwrap();
        assert!(flipped.is_empty());
        assert_eq!(board.get(Position::new(1, 1)), Cell::Occupied(Seat::One));
    }

    #[test]
    fn test_strategies_agree_on_random_boards() {
        let mut rng = StdRng::seed_from_u64(0x7070);
        for _ in 0..200 {
            let width = rng.gen_range(3..16);
            let height = rng.gen_range(3..16);
            let original = random_board(&mut rng, width, height);
            let mover = if rng.gen_bool(0.5) { Seat::One } else { Seat::Two };

            let mut full = original.clone();
            let mut work = original.clone();
            let a = propagate_with(&mut full, mover, CaptureStrategy::FullScan).unwrap();
            let b = propagate_with(&mut work, mover, CaptureStrategy::Worklist).unwrap();
            assert_eq!(a, b);
            assert_eq!(full, work);
        }
    }

    #[test]
    fn test_propagation_reaches_fixed_point() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let mut board = random_board(&mut rng, 8, 8);
            let mover = Seat::Two;
            propagate(&mut board, mover).unwrap();
            let victim = Cell::Occupied(mover.opponent());
            for idx in 0..board.len() {
                if board.get_index(idx) == victim {
                    assert!(board.neighbours_owned_by(idx, mover) < CAPTURE_THRESHOLD);
                }
            }
        }
    }

    #[test]
    fn test_default_strategy_by_size() {
        assert_eq!(
            CaptureStrategy::for_board(&Board::new(10, 10).unwrap()),
            CaptureStrategy::FullScan
        );
        assert_eq!(
            CaptureStrategy::for_board(&Board::new(32, 32).unwrap()),
            CaptureStrategy::Worklist
        );
    }
}
