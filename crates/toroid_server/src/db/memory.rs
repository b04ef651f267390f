//! In-process durable store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::db::{
    DbError, DbErrorKind, MoveLogEntry, NewMoveLogEntry, NewSessionRecord, SessionChanges,
    SessionRecord, SessionRecords,
};
use crate::session::SessionStatus;

#[derive(Debug, Default)]
struct Tables {
    sessions: HashMap<String, SessionRecord>,
    moves: Vec<MoveLogEntry>,
}

/// [`SessionRecords`] kept in memory. Lost on restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecords {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryRecords {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRecords for MemoryRecords {
    #[instrument(skip(self, record), fields(session_id = %record.id()))]
    async fn create_session(&self, record: NewSessionRecord) -> Result<SessionRecord, DbError> {
        let mut tables = self.tables.lock().await;
        if tables.sessions.contains_key(record.id()) {
            return Err(DbError::with_kind(
                DbErrorKind::Conflict,
                format!("Session id '{}' already exists", record.id()),
            ));
        }
        if tables.sessions.values().any(|s| s.code() == record.code()) {
            return Err(DbError::with_kind(
                DbErrorKind::Conflict,
                format!("Join code '{}' already exists", record.code()),
            ));
        }
        let created = record.into_record();
        tables.sessions.insert(created.id().clone(), created.clone());
        debug!("Session recorded");
        Ok(created)
    }

    async fn find_session(&self, id: &str) -> Result<Option<SessionRecord>, DbError> {
        Ok(self.tables.lock().await.sessions.get(id).cloned())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<SessionRecord>, DbError> {
        let tables = self.tables.lock().await;
        Ok(tables.sessions.values().find(|s| s.code() == code).cloned())
    }

    async fn update_session(&self, id: &str, changes: SessionChanges) -> Result<bool, DbError> {
        let mut tables = self.tables.lock().await;
        match tables.sessions.get_mut(id) {
            Some(record) => {
                changes.apply_to(record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    #[instrument(skip(self, entries), fields(count = entries.len()))]
    async fn append_moves(&self, entries: Vec<NewMoveLogEntry>) -> Result<usize, DbError> {
        let mut tables = self.tables.lock().await;
        for entry in &entries {
            let duplicate = tables
                .moves
                .iter()
                .any(|m| m.session_id() == entry.session_id() && m.sequence() == entry.sequence());
            if duplicate {
                return Err(DbError::with_kind(
                    DbErrorKind::Conflict,
                    format!(
                        "Move {} of session '{}' already recorded",
                        entry.sequence(),
                        entry.session_id()
                    ),
                ));
            }
        }
        let count = entries.len();
        for entry in entries {
            let id = tables.moves.len() as i32 + 1;
            tables.moves.push(entry.into_entry(id));
        }
        Ok(count)
    }

    async fn moves_for_session(&self, session_id: &str) -> Result<Vec<MoveLogEntry>, DbError> {
        let tables = self.tables.lock().await;
        let mut moves: Vec<MoveLogEntry> = tables
            .moves
            .iter()
            .filter(|m| m.session_id() == session_id)
            .cloned()
            .collect();
        moves.sort_by_key(|m| *m.sequence());
        Ok(moves)
    }

    async fn stale_sessions(&self, now: NaiveDateTime) -> Result<Vec<SessionRecord>, DbError> {
        let tables = self.tables.lock().await;
        let live = [
            SessionStatus::Waiting.as_ref(),
            SessionStatus::Playing.as_ref(),
        ];
        Ok(tables
            .sessions
            .values()
            .filter(|s| live.contains(&s.status().as_str()) && *s.expires_at() < now)
            .cloned()
            .collect())
    }
}
