//! Board rules.
//!
//! Pure functions over [`Board`](crate::Board) values, kept apart from
//! the state type so the engine and the contracts can share them.

pub mod capture;
pub mod ending;

pub use capture::{CAPTURE_THRESHOLD, CaptureStrategy, WORKLIST_MIN_CELLS, propagate, propagate_with};
pub use ending::{is_finished, outcome};
