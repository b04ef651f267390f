//! SQLite repository for session metadata and the move log.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::{debug, info, instrument, warn};

use crate::db::{
    DbError, MoveLogEntry, NewMoveLogEntry, NewSessionRecord, SessionChanges, SessionRecord,
    schema,
};
use crate::session::SessionStatus;

/// Schema migrations compiled into the binary.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Milliseconds SQLite waits on a locked database before failing.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Database repository for sessions and moves.
///
/// Opens a connection per call, so it needs a file path. An in-memory
/// SQLite database would be empty on every call.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    db_path: String,
}

impl SessionRepository {
    /// Opens the database at `db_path` and applies pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the database can't be opened or migrated.
    #[instrument]
    pub fn open(db_path: &str) -> Result<Self, DbError> {
        let repo = Self {
            db_path: db_path.to_string(),
        };
        let mut conn = repo.connection()?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| DbError::new(format!("Migrations failed: {}", e)))?;
        info!(path = %repo.db_path, migrations = applied.len(), "SessionRepository ready");
        Ok(repo)
    }

    /// Path of the database file.
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Establishes a database connection.
    #[instrument(skip(self))]
    fn connection(&self) -> Result<SqliteConnection, DbError> {
        debug!(path = %self.db_path, "Establishing connection");
        let mut conn = SqliteConnection::establish(&self.db_path).map_err(|e| {
            DbError::new(format!("Failed to connect to '{}': {}", self.db_path, e))
        })?;
        diesel::sql_query(format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS))
            .execute(&mut conn)?;
        Ok(conn)
    }

    /// Inserts a new session.
    ///
    /// # Errors
    ///
    /// Returns a conflict [`DbError`] if the id or join code is taken.
    #[instrument(skip(self, record), fields(session_id = %record.id(), code = %record.code()))]
    pub fn create_session(&self, record: &NewSessionRecord) -> Result<SessionRecord, DbError> {
        debug!("Inserting session");
        let mut conn = self.connection()?;

        let created = diesel::insert_into(schema::sessions::table)
            .values(record)
            .returning(SessionRecord::as_returning())
            .get_result(&mut conn)
            .inspect_err(|e| warn!(error = %e, "Session insert failed"))?;

        info!(session_id = %created.id(), "Session recorded");
        Ok(created)
    }

    /// Gets a session by id.
    #[instrument(skip(self))]
    pub fn find_session(&self, id: &str) -> Result<Option<SessionRecord>, DbError> {
        let mut conn = self.connection()?;
        let record = schema::sessions::table
            .find(id)
            .select(SessionRecord::as_select())
            .first(&mut conn)
            .optional()?;
        debug!(found = record.is_some(), "Looked up session by id");
        Ok(record)
    }

    /// Gets a session by join code.
    #[instrument(skip(self))]
    pub fn find_by_code(&self, code: &str) -> Result<Option<SessionRecord>, DbError> {
        let mut conn = self.connection()?;
        let record = schema::sessions::table
            .filter(schema::sessions::code.eq(code))
            .select(SessionRecord::as_select())
            .first(&mut conn)
            .optional()?;
        debug!(found = record.is_some(), "Looked up session by code");
        Ok(record)
    }

    /// Applies a partial update. Returns false if no such session exists.
    #[instrument(skip(self, changes))]
    pub fn update_session(&self, id: &str, changes: &SessionChanges) -> Result<bool, DbError> {
        let mut conn = self.connection()?;
        let rows = diesel::update(schema::sessions::table.find(id))
            .set(changes)
            .execute(&mut conn)?;
        debug!(rows, status = ?changes.status, "Session updated");
        Ok(rows > 0)
    }

    /// Appends moves in a single transaction.
    #[instrument(skip(self, entries), fields(count = entries.len()))]
    pub fn append_moves(&self, entries: &[NewMoveLogEntry]) -> Result<usize, DbError> {
        if entries.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection()?;
        let rows = conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::insert_into(schema::move_log::table)
                .values(entries)
                .execute(conn)
        })?;
        debug!(rows, "Moves appended");
        Ok(rows)
    }

    /// All moves of a session in move order.
    #[instrument(skip(self))]
    pub fn moves_for_session(&self, session_id: &str) -> Result<Vec<MoveLogEntry>, DbError> {
        let mut conn = self.connection()?;
        let moves = schema::move_log::table
            .filter(schema::move_log::session_id.eq(session_id))
            .order(schema::move_log::sequence.asc())
            .select(MoveLogEntry::as_select())
            .load(&mut conn)?;
        debug!(count = moves.len(), "Moves loaded");
        Ok(moves)
    }

    /// Waiting or playing sessions whose idle deadline passed.
    #[instrument(skip(self))]
    pub fn stale_sessions(&self, now: NaiveDateTime) -> Result<Vec<SessionRecord>, DbError> {
        let mut conn = self.connection()?;
        let live = [
            SessionStatus::Waiting.as_ref(),
            SessionStatus::Playing.as_ref(),
        ];
        let stale = schema::sessions::table
            .filter(schema::sessions::status.eq_any(live))
            .filter(schema::sessions::expires_at.lt(now))
            .select(SessionRecord::as_select())
            .load(&mut conn)?;
        debug!(count = stale.len(), "Stale sessions loaded");
        Ok(stale)
    }
}
