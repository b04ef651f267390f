//! Core domain types for the toroidal capture game.

use derive_more::Display;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::action::Move;

/// Smallest width or height a board may have.
///
/// Below three columns the wrapped 8-neighbourhood would visit the same
/// cell twice.
pub const MIN_BOARD_SIDE: usize = 3;

/// Default board width.
pub const DEFAULT_WIDTH: usize = 10;

/// Default board height.
pub const DEFAULT_HEIGHT: usize = 10;

/// One of the two seats at the table.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    JsonSchema,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Seat {
    /// First seat (session creator, moves first).
    One,
    /// Second seat (joiner).
    Two,
}

impl Seat {
    /// Returns the opposing seat.
    pub fn opponent(self) -> Self {
        match self {
            Seat::One => Seat::Two,
            Seat::Two => Seat::One,
        }
    }

    /// Player number as shown to clients (1 or 2).
    pub fn number(self) -> u8 {
        match self {
            Seat::One => 1,
            Seat::Two => 2,
        }
    }
}

impl std::fmt::Display for Seat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "player{}", self.number())
    }
}

/// Contents of a single board cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Cell {
    /// Nobody owns the cell.
    Empty,
    /// Owned by a seat.
    Occupied(Seat),
}

impl Cell {
    /// Returns the owner, if any.
    pub fn owner(self) -> Option<Seat> {
        match self {
            Cell::Empty => None,
            Cell::Occupied(seat) => Some(seat),
        }
    }
}

/// A board coordinate.
///
/// Positions coming from clients may lie outside the board or be
/// negative; [`Board::wrap`] maps them onto the torus.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Display,
)]
#[display("({x}, {y})")]
pub struct Position {
    /// Column.
    pub x: i64,
    /// Row.
    pub y: i64,
}

impl Position {
    /// Creates a position.
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// Board construction error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display("Board {}x{} is too small (minimum side is {})", width, height, MIN_BOARD_SIDE)]
pub struct BoardError {
    /// Requested width.
    pub width: usize,
    /// Requested height.
    pub height: usize,
}

impl std::error::Error for BoardError {}

/// Fixed-size wraparound grid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Board {
    width: usize,
    height: usize,
    /// Cells in row-major order.
    cells: Vec<Cell>,
}

impl Board {
    /// Creates an empty board.
    pub fn new(width: usize, height: usize) -> Result<Self, BoardError> {
        if width < MIN_BOARD_SIDE || height < MIN_BOARD_SIDE {
            return Err(BoardError { width, height });
        }
        Ok(Self {
            width,
            height,
            cells: vec![Cell::Empty; width * height],
        })
    }

    /// Board width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Board height.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Always false: boards have at least nine cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Normalizes a position onto the torus.
    pub fn wrap(&self, pos: Position) -> Position {
        Position {
            x: pos.x.rem_euclid(self.width as i64),
            y: pos.y.rem_euclid(self.height as i64),
        }
    }

    /// Row-major index of a (wrapped) position.
    pub fn index_of(&self, pos: Position) -> usize {
        let p = self.wrap(pos);
        p.y as usize * self.width + p.x as usize
    }

    /// Position of a row-major index.
    pub fn position_of(&self, index: usize) -> Position {
        Position {
            x: (index % self.width) as i64,
            y: (index / self.width) as i64,
        }
    }

    /// Cell at a (wrapped) position.
    pub fn get(&self, pos: Position) -> Cell {
        self.cells[self.index_of(pos)]
    }

    /// Cell at a row-major index.
    pub fn get_index(&self, index: usize) -> Cell {
        self.cells[index]
    }

    /// Writes a cell at a (wrapped) position.
    pub fn set(&mut self, pos: Position, cell: Cell) {
        let idx = self.index_of(pos);
        self.cells[idx] = cell;
    }

    pub(crate) fn set_index(&mut self, index: usize, cell: Cell) {
        self.cells[index] = cell;
    }

    /// True if the (wrapped) cell is empty.
    pub fn is_free(&self, pos: Position) -> bool {
        self.get(pos) == Cell::Empty
    }

    /// Row-major indices of the eight wrapped neighbours of `index`.
    pub fn neighbours(&self, index: usize) -> [usize; 8] {
        let w = self.width as i64;
        let h = self.height as i64;
        let x = (index % self.width) as i64;
        let y = (index / self.width) as i64;
        let mut out = [0usize; 8];
        let mut i = 0;
        for dy in -1..=1i64 {
            for dx in -1..=1i64 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let nx = (x + dx).rem_euclid(w);
                let ny = (y + dy).rem_euclid(h);
                out[i] = (ny * w + nx) as usize;
                i += 1;
            }
        }
        out
    }

    /// Number of neighbours of `index` owned by `seat`.
    pub fn neighbours_owned_by(&self, index: usize, seat: Seat) -> usize {
        self.neighbours(index)
            .iter()
            .filter(|&&n| self.cells[n] == Cell::Occupied(seat))
            .count()
    }

    /// Number of cells owned by `seat`.
    pub fn count(&self, seat: Seat) -> usize {
        self.cells
            .iter()
            .filter(|&&c| c == Cell::Occupied(seat))
            .count()
    }

    /// Number of occupied cells.
    pub fn occupied(&self) -> usize {
        self.cells.iter().filter(|&&c| c != Cell::Empty).count()
    }

    /// True when no empty cell remains.
    pub fn is_full(&self) -> bool {
        self.cells.iter().all(|&c| c != Cell::Empty)
    }

    /// All cells in row-major order.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Formats the board as text, one row per line.
    pub fn display(&self) -> String {
        let mut out = String::with_capacity((self.width + 1) * self.height);
        for row in self.cells.chunks(self.width) {
            for cell in row {
                out.push(match cell {
                    Cell::Empty => '.',
                    Cell::Occupied(Seat::One) => '1',
                    Cell::Occupied(Seat::Two) => '2',
                });
            }
            out.push('\n');
        }
        out
    }
}

impl Default for Board {
    /// Empty board of the default size.
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            cells: vec![Cell::Empty; DEFAULT_WIDTH * DEFAULT_HEIGHT],
        }
    }
}

/// Per-seat piece counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
pub struct Scores {
    /// Cells owned by seat one.
    pub one: u32,
    /// Cells owned by seat two.
    pub two: u32,
}

impl Scores {
    /// Counts both seats' cells on the board.
    pub fn tally(board: &Board) -> Self {
        Self {
            one: board.count(Seat::One) as u32,
            two: board.count(Seat::Two) as u32,
        }
    }

    /// Score of one seat.
    pub fn of(&self, seat: Seat) -> u32 {
        match seat {
            Seat::One => self.one,
            Seat::Two => self.two,
        }
    }

    /// Seat with the strictly higher score, `None` on a tie.
    pub fn leader(&self) -> Option<Seat> {
        match self.one.cmp(&self.two) {
            std::cmp::Ordering::Greater => Some(Seat::One),
            std::cmp::Ordering::Less => Some(Seat::Two),
            std::cmp::Ordering::Equal => None,
        }
    }
}

/// Whose turn it is and how much of it remains.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TurnState {
    /// Seat to move.
    pub current_player: Seat,
    /// Placements still allowed in this turn.
    pub place_operations_left: u8,
    /// Moves applied so far in this turn, captures included.
    pub moves_this_turn: Vec<Move>,
    /// Turn counter, starting at 1.
    pub number: u32,
}

/// Final result of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Outcome {
    /// Winner, `None` on a tie.
    pub winner: Option<Seat>,
    /// Final scores.
    pub scores: Scores,
}

/// Complete game state. Treated as an immutable value: the engine
/// returns a fresh copy for every applied move.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct GameState {
    board: Board,
    turn: TurnState,
    scores: Scores,
    /// Number of moves applied so far; the next move's sequence.
    sequence: u64,
    outcome: Option<Outcome>,
}

impl GameState {
    pub(crate) fn from_parts(board: Board, turn: TurnState, sequence: u64) -> Self {
        let scores = Scores::tally(&board);
        let outcome = crate::rules::outcome(&board);
        Self {
            board,
            turn,
            scores,
            sequence,
            outcome,
        }
    }

    /// Builds a state around an arbitrary board, e.g. to resume a
    /// position or to set up a puzzle. Scores and outcome are derived
    /// from the board.
    pub fn with_board(board: Board, current_player: Seat, place_operations_left: u8) -> Self {
        let turn = TurnState {
            current_player,
            place_operations_left,
            moves_this_turn: Vec::new(),
            number: 1,
        };
        Self::from_parts(board, turn, 0)
    }

    /// The board.
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Turn bookkeeping.
    pub fn turn(&self) -> &TurnState {
        &self.turn
    }

    /// Seat to move.
    pub fn current_player(&self) -> Seat {
        self.turn.current_player
    }

    /// Scores, recomputed after every move.
    pub fn scores(&self) -> Scores {
        self.scores
    }

    /// Sequence number the next move must carry.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Final result once the board is full.
    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// True once the board is full.
    pub fn is_over(&self) -> bool {
        self.outcome.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_negative_and_overflow() {
        let board = Board::new(10, 10).unwrap();
        assert_eq!(board.wrap(Position::new(-1, -1)), Position::new(9, 9));
        assert_eq!(board.wrap(Position::new(10, 23)), Position::new(0, 3));
        assert_eq!(board.index_of(Position::new(-1, 0)), 9);
    }

    #[test]
    fn test_neighbours_wrap_around_corner() {
        let board = Board::new(10, 10).unwrap();
        let mut n = board.neighbours(0).to_vec();
        n.sort_unstable();
        assert_eq!(n, vec![1, 9, 10, 11, 19, 90, 91, 99]);
    }

    #[test]
    fn test_board_too_small() {
        assert!(Board::new(2, 10).is_err());
        assert!(Board::new(3, 3).is_ok());
    }

    #[test]
    fn test_scores_leader() {
        assert_eq!(Scores { one: 3, two: 2 }.leader(), Some(Seat::One));
        assert_eq!(Scores { one: 1, two: 2 }.leader(), Some(Seat::Two));
        assert_eq!(Scores { one: 2, two: 2 }.leader(), None);
    }

    #[test]
    fn test_with_board_detects_full_board() {
        let mut board = Board::new(3, 3).unwrap();
        for i in 0..9 {
            let seat = if i < 5 { Seat::One } else { Seat::Two };
            board.set_index(i, Cell::Occupied(seat));
        }
        let state = GameState::with_board(board, Seat::One, 2);
        let outcome = state.outcome().unwrap();
        assert_eq!(outcome.winner, Some(Seat::One));
        assert_eq!(outcome.scores, Scores { one: 5, two: 4 });
    }
}
