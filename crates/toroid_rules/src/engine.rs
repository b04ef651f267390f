//! Rule engine entry points.
//!
//! Everything here is a pure function of its arguments: no clock, no
//! randomness, no I/O. Identical inputs give identical outputs.

use tracing::{debug, instrument};

use crate::action::{Move, MoveError, MoveKind};
use crate::contracts::{LegalMove, MoveContract};
use crate::rules::capture;
use crate::types::{Board, BoardError, Cell, GameState, Position, Seat, TurnState};

/// Placements allowed in the game's very first turn.
pub const OPENING_PLACE_OPERATIONS: u8 = 1;

/// Placements allowed in every later turn.
pub const PLACE_OPERATIONS_PER_TURN: u8 = 2;

/// Result of applying a move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// State after the move.
    pub state: GameState,
    /// Moves recorded for this application: the submitted move first
    /// (with its position wrapped), then one replace move per capture.
    pub applied: Vec<Move>,
    /// True if control passed to the other seat.
    pub turn_passed: bool,
}

impl Transition {
    /// Cells flipped by captures, in flip order.
    pub fn captured(&self) -> Vec<Position> {
        self.applied
            .iter()
            .filter(|m| m.kind == MoveKind::Replace)
            .map(|m| m.position)
            .collect()
    }
}

/// Empty default-size board, seat one to move with the opening budget.
pub fn create_initial_state() -> GameState {
    initial_state_on(Board::default())
}

/// Empty board of the given size, seat one to move with the opening budget.
pub fn create_initial_state_with(width: usize, height: usize) -> Result<GameState, BoardError> {
    Ok(initial_state_on(Board::new(width, height)?))
}

fn initial_state_on(board: Board) -> GameState {
    let turn = TurnState {
        current_player: Seat::One,
        place_operations_left: OPENING_PLACE_OPERATIONS,
        moves_this_turn: Vec::new(),
        number: 1,
    };
    GameState::from_parts(board, turn, 0)
}

/// Checks a move without applying it, explaining any rejection.
pub fn check_move(state: &GameState, mv: &Move, player: Seat) -> Result<(), MoveError> {
    LegalMove::check(state, mv, player)
}

/// True if `player` may apply `mv` to `state`.
pub fn is_valid_move(state: &GameState, mv: &Move, player: Seat) -> bool {
    check_move(state, mv, player).is_ok()
}

/// Applies a move for `player`, returning the next state.
///
/// `state` is left untouched. Recorded moves carry `player` as the
/// acting seat and the submitted move's timestamp, and are numbered from
/// `state.sequence()`. Postconditions are checked on every call; a
/// violation comes back as [`MoveError::InvariantViolation`].
#[instrument(skip(state), fields(sequence = state.sequence()))]
pub fn apply_move(state: &GameState, mv: &Move, player: Seat) -> Result<Transition, MoveError> {
    MoveContract::pre(state, mv, player)?;

    let mut board = state.board().clone();
    let mut sequence = state.sequence();
    let mut applied = Vec::new();

    match mv.kind {
        MoveKind::Place => {
            let position = board.wrap(mv.position);
            board.set(position, Cell::Occupied(player));
            applied.push(Move::place(player, position, sequence, mv.timestamp_ms));
            sequence += 1;

            for flipped in capture::propagate(&mut board, player)? {
                applied.push(Move {
                    kind: MoveKind::Replace,
                    position: flipped,
                    player,
                    sequence,
                    timestamp_ms: mv.timestamp_ms,
                });
                sequence += 1;
            }
        }
        MoveKind::Skip => {
            applied.push(Move::skip(player, sequence, mv.timestamp_ms));
            sequence += 1;
        }
        MoveKind::Replace => return Err(MoveError::ReplaceNotSubmittable),
    }

    let previous = state.turn();
    let left = match mv.kind {
        MoveKind::Place => previous.place_operations_left.saturating_sub(1),
        MoveKind::Replace | MoveKind::Skip => 0,
    };
    let turn_passed = left == 0;
    let turn = if turn_passed {
        TurnState {
            current_player: player.opponent(),
            place_operations_left: PLACE_OPERATIONS_PER_TURN,
            moves_this_turn: Vec::new(),
            number: previous.number + 1,
        }
    } else {
        let mut moves_this_turn = previous.moves_this_turn.clone();
        moves_this_turn.extend(applied.iter().copied());
        TurnState {
            current_player: previous.current_player,
            place_operations_left: left,
            moves_this_turn,
            number: previous.number,
        }
    };

    let next = GameState::from_parts(board, turn, sequence);

    MoveContract::post(state, &next, mv.kind)?;

    debug!(
        applied = applied.len(),
        turn_passed,
        scores = ?next.scores(),
        over = next.is_over(),
        "Move applied"
    );

    Ok(Transition {
        state: next,
        applied,
        turn_passed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Scores;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn place(state: &GameState, x: i64, y: i64) -> Transition {
        let mv = Move::place(state.current_player(), Position::new(x, y), state.sequence(), 0);
        apply_move(state, &mv, state.current_player()).unwrap()
    }

    #[test]
    fn test_initial_state() {
        let state = create_initial_state();
        assert_eq!(state.board().width(), 10);
        assert_eq!(state.board().height(), 10);
        assert_eq!(state.current_player(), Seat::One);
        assert_eq!(state.turn().place_operations_left, 1);
        assert_eq!(state.scores(), Scores::default());
        assert!(!state.is_over());
    }

    #[test]
    fn test_opening_turn_has_one_placement_then_two() {
        let state = create_initial_state();
        let t1 = place(&state, 0, 0);
        assert!(t1.turn_passed);
        assert_eq!(t1.state.current_player(), Seat::Two);
        assert_eq!(t1.state.turn().place_operations_left, 2);

        let t2 = place(&t1.state, 5, 5);
        assert!(!t2.turn_passed);
        assert_eq!(t2.state.current_player(), Seat::Two);
        assert_eq!(t2.state.turn().place_operations_left, 1);
        assert_eq!(t2.state.turn().moves_this_turn.len(), 1);

        let t3 = place(&t2.state, 6, 6);
        assert!(t3.turn_passed);
        assert_eq!(t3.state.current_player(), Seat::One);
        assert_eq!(t3.state.turn().place_operations_left, 2);
        assert_eq!(t3.state.turn().number, 3);
    }

    #[test]
    fn test_placement_wraps_position() {
        let state = create_initial_state();
        let t = place(&state, -1, 12);
        assert_eq!(t.applied[0].position, Position::new(9, 2));
        assert_eq!(t.state.board().get(Position::new(9, 2)), Cell::Occupied(Seat::One));
    }

    #[test]
    fn test_occupied_after_wrap_is_invalid() {
        let state = place(&create_initial_state(), 3, 3).state;
        let mv = Move::place(Seat::Two, Position::new(13, -7), state.sequence(), 0);
        assert!(!is_valid_move(&state, &mv, Seat::Two));
        assert_eq!(
            check_move(&state, &mv, Seat::Two),
            Err(MoveError::CellOccupied(Position::new(3, 3)))
        );
    }

    #[test]
    fn test_wrong_turn_is_invalid() {
        let state = create_initial_state();
        let mv = Move::place(Seat::Two, Position::new(1, 1), 0, 0);
        assert!(!is_valid_move(&state, &mv, Seat::Two));
    }

    #[test]
    fn test_apply_does_not_mutate_input() {
        let state = create_initial_state();
        let snapshot = state.clone();
        let _ = place(&state, 2, 2);
        assert_eq!(state, snapshot);
    }

    #[test]
    fn test_capture_in_same_apply_call() {
        let mut board = Board::new(10, 10).unwrap();
        for (x, y) in [(0, 0), (0, 1), (0, 2), (1, 0), (1, 2)] {
            board.set(Position::new(x, y), Cell::Occupied(Seat::One));
        }
        board.set(Position::new(1, 1), Cell::Occupied(Seat::Two));
        let state = GameState::with_board(board, Seat::One, 2);

        let t = place(&state, 2, 0);
        assert_eq!(t.captured(), vec![Position::new(1, 1)]);
        assert_eq!(t.state.board().get(Position::new(1, 1)), Cell::Occupied(Seat::One));
        assert_eq!(t.state.scores(), Scores { one: 7, two: 0 });
        assert_eq!(t.applied.len(), 2);
        assert_eq!(t.applied[1].kind, MoveKind::Replace);
        assert_eq!(t.applied[1].sequence, 1);
        assert_eq!(t.state.sequence(), 2);
    }

    #[test]
    fn test_skip_passes_turn() {
        let state = place(&create_initial_state(), 0, 0).state;
        let mv = Move::skip(Seat::Two, state.sequence(), 0);
        let t = apply_move(&state, &mv, Seat::Two).unwrap();
        assert!(t.turn_passed);
        assert_eq!(t.state.current_player(), Seat::One);
        assert_eq!(t.state.turn().place_operations_left, 2);
        assert_eq!(t.state.board(), state.board());
    }

    #[test]
    fn test_game_ends_when_board_full() {
        let mut board = Board::new(3, 3).unwrap();
        for i in 0..8 {
            let seat = if i % 2 == 0 { Seat::One } else { Seat::Two };
            board.set(Position::new(i % 3, i / 3), Cell::Occupied(seat));
        }
        let state = GameState::with_board(board, Seat::Two, 1);
        let t = place(&state, 2, 2);
        assert!(t.state.is_over());
        let outcome = t.state.outcome().unwrap();
        assert_eq!(outcome.scores.one + outcome.scores.two, 9);
        assert_eq!(outcome.winner, outcome.scores.leader());

        let mv = Move::skip(t.state.current_player(), t.state.sequence(), 0);
        assert_eq!(
            apply_move(&t.state, &mv, t.state.current_player()),
            Err(MoveError::GameOver)
        );
    }

    #[test]
    fn test_random_games_are_deterministic_and_keep_scores() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut state = create_initial_state_with(6, 6).unwrap();
        let mut replay = state.clone();
        while !state.is_over() {
            let player = state.current_player();
            let free: Vec<usize> = (0..state.board().len())
                .filter(|&i| state.board().get_index(i) == Cell::Empty)
                .collect();
            let idx = free[rng.gen_range(0..free.len())];
            let mv = Move::place(player, state.board().position_of(idx), state.sequence(), 1);

            let a = apply_move(&state, &mv, player).unwrap();
            let b = apply_move(&replay, &mv, player).unwrap();
            assert_eq!(a, b);
            assert_eq!(a.state.scores(), Scores::tally(a.state.board()));
            state = a.state;
            replay = b.state;
        }
        assert_eq!(state.board().occupied(), 36);
    }
}
