//! Durable persistence of session metadata and the move log.

mod error;
mod memory;
mod models;
mod records;
mod repository;
mod schema; // Diesel generated schema - internal use only

pub use error::{DbError, DbErrorKind};
pub use memory::MemoryRecords;
pub use models::{MoveLogEntry, NewMoveLogEntry, NewSessionRecord, SessionChanges, SessionRecord};
pub use records::SessionRecords;
pub use repository::{MIGRATIONS, SessionRepository};
