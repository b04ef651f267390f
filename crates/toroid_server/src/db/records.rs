//! Async durable-store interface.

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::db::{
    DbError, MoveLogEntry, NewMoveLogEntry, NewSessionRecord, SessionChanges, SessionRecord,
    SessionRepository,
};

/// Durable record of sessions and their move logs.
///
/// The move log is append-only: entries are never updated or deleted.
#[async_trait]
pub trait SessionRecords: Send + Sync + 'static {
    /// Inserts a session. A taken join code is a conflict error.
    async fn create_session(&self, record: NewSessionRecord) -> Result<SessionRecord, DbError>;

    /// Session by id.
    async fn find_session(&self, id: &str) -> Result<Option<SessionRecord>, DbError>;

    /// Session by join code.
    async fn find_by_code(&self, code: &str) -> Result<Option<SessionRecord>, DbError>;

    /// Partial update. Returns false if the session is unknown.
    async fn update_session(&self, id: &str, changes: SessionChanges) -> Result<bool, DbError>;

    /// Appends moves atomically.
    async fn append_moves(&self, entries: Vec<NewMoveLogEntry>) -> Result<usize, DbError>;

    /// Moves of a session ordered by sequence.
    async fn moves_for_session(&self, session_id: &str) -> Result<Vec<MoveLogEntry>, DbError>;

    /// Waiting or playing sessions idle past their deadline.
    async fn stale_sessions(&self, now: NaiveDateTime) -> Result<Vec<SessionRecord>, DbError>;
}

#[async_trait]
impl SessionRecords for SessionRepository {
    async fn create_session(&self, record: NewSessionRecord) -> Result<SessionRecord, DbError> {
        let repo = self.clone();
        tokio::task::spawn_blocking(move || repo.create_session(&record)).await?
    }

    async fn find_session(&self, id: &str) -> Result<Option<SessionRecord>, DbError> {
        let repo = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || repo.find_session(&id)).await?
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<SessionRecord>, DbError> {
        let repo = self.clone();
        let code = code.to_string();
        tokio::task::spawn_blocking(move || repo.find_by_code(&code)).await?
    }

    async fn update_session(&self, id: &str, changes: SessionChanges) -> Result<bool, DbError> {
        let repo = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || repo.update_session(&id, &changes)).await?
    }

    async fn append_moves(&self, entries: Vec<NewMoveLogEntry>) -> Result<usize, DbError> {
        let repo = self.clone();
        tokio::task::spawn_blocking(move || repo.append_moves(&entries)).await?
    }

    async fn moves_for_session(&self, session_id: &str) -> Result<Vec<MoveLogEntry>, DbError> {
        let repo = self.clone();
        let session_id = session_id.to_string();
        tokio::task::spawn_blocking(move || repo.moves_for_session(&session_id)).await?
    }

    async fn stale_sessions(&self, now: NaiveDateTime) -> Result<Vec<SessionRecord>, DbError> {
        let repo = self.clone();
        tokio::task::spawn_blocking(move || repo.stale_sessions(now)).await?
    }
}
