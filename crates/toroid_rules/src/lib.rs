//! Toroid rules - pure capture game logic.
//!
//! Two seats take turns placing pieces on a wraparound grid. A piece of
//! the opponent surrounded by five or more of the mover's pieces (in
//! its wrapped 8-neighbourhood) is captured and changes colour; captures
//! cascade until the board settles. The game ends when the board is
//! full and the seat owning more cells wins.
//!
//! # Example
//!
//! ```
//! use toroid_rules::{Move, Position, Seat, apply_move, create_initial_state};
//!
//! let state = create_initial_state();
//! let mv = Move::place(Seat::One, Position::new(0, 0), state.sequence(), 0);
//! let next = apply_move(&state, &mv, Seat::One).unwrap().state;
//! assert_eq!(next.current_player(), Seat::Two);
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod action;
mod contracts;
mod engine;
pub mod rules;
mod types;

pub use action::{Move, MoveError, MoveKind};
pub use contracts::{
    GameNotOver, LegalMove, MoveContract, OccupancyGrows, PlayersTurn, ScoresMatchBoard,
    SequenceMatches, TargetAvailable, TurnBudget,
};
pub use engine::{
    OPENING_PLACE_OPERATIONS, PLACE_OPERATIONS_PER_TURN, Transition, apply_move, check_move,
    create_initial_state, create_initial_state_with, is_valid_move,
};
pub use rules::CAPTURE_THRESHOLD;
pub use types::{
    Board, BoardError, Cell, DEFAULT_HEIGHT, DEFAULT_WIDTH, GameState, MIN_BOARD_SIDE, Outcome,
    Position, Scores, Seat, TurnState,
};
