//! Database models.

use std::str::FromStr;

use chrono::NaiveDateTime;
use derive_getters::Getters;
use derive_new::new;
use diesel::prelude::*;
use serde::Serialize;
use toroid_rules::{Move, MoveKind, Position, Scores, Seat};
use tracing::instrument;

use crate::db::{DbError, schema};
use crate::session::{GameSession, SessionStatus};

/// Durable session metadata.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Identifiable, Selectable, Getters, Serialize)]
#[diesel(table_name = schema::sessions)]
pub struct SessionRecord {
    id: String,
    code: String,
    status: String,
    player_one: Option<String>,
    player_two: Option<String>,
    board_width: i32,
    board_height: i32,
    created_at: NaiveDateTime,
    start_time: Option<NaiveDateTime>,
    last_activity_at: NaiveDateTime,
    expires_at: NaiveDateTime,
    total_turns: i32,
    winner: Option<String>,
    final_score_one: Option<i32>,
    final_score_two: Option<i32>,
}

impl SessionRecord {
    /// Parses the stored status.
    #[instrument(skip(self), fields(status = %self.status))]
    pub fn parse_status(&self) -> Result<SessionStatus, DbError> {
        SessionStatus::from_str(&self.status)
            .map_err(|_| DbError::new(format!("Invalid session status: '{}'", self.status)))
    }
}

/// Insertable session metadata.
#[derive(Debug, Clone, Insertable, Getters)]
#[diesel(table_name = schema::sessions)]
pub struct NewSessionRecord {
    id: String,
    code: String,
    status: String,
    player_one: Option<String>,
    player_two: Option<String>,
    board_width: i32,
    board_height: i32,
    created_at: NaiveDateTime,
    start_time: Option<NaiveDateTime>,
    last_activity_at: NaiveDateTime,
    expires_at: NaiveDateTime,
    total_turns: i32,
}

impl NewSessionRecord {
    /// Metadata for a freshly created session.
    pub fn from_session(session: &GameSession) -> Self {
        let board = session.state.board();
        Self {
            id: session.id.clone(),
            code: session.code.clone(),
            status: session.status.as_ref().to_string(),
            player_one: session.player_in(Seat::One).map(|p| p.id.clone()),
            player_two: session.player_in(Seat::Two).map(|p| p.id.clone()),
            board_width: board.width() as i32,
            board_height: board.height() as i32,
            created_at: session.created_at.naive_utc(),
            start_time: session.started_at.map(|t| t.naive_utc()),
            last_activity_at: session.last_activity_at.naive_utc(),
            expires_at: session.expires_at.naive_utc(),
            total_turns: session.total_turns() as i32,
        }
    }

    pub(crate) fn into_record(self) -> SessionRecord {
        SessionRecord {
            id: self.id,
            code: self.code,
            status: self.status,
            player_one: self.player_one,
            player_two: self.player_two,
            board_width: self.board_width,
            board_height: self.board_height,
            created_at: self.created_at,
            start_time: self.start_time,
            last_activity_at: self.last_activity_at,
            expires_at: self.expires_at,
            total_turns: self.total_turns,
            winner: None,
            final_score_one: None,
            final_score_two: None,
        }
    }
}

/// Partial update of session metadata. `None` leaves a column unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, AsChangeset)]
#[diesel(table_name = schema::sessions)]
pub struct SessionChanges {
    /// New status.
    pub status: Option<String>,
    /// Second seat.
    pub player_two: Option<Option<String>>,
    /// When play began.
    pub start_time: Option<Option<NaiveDateTime>>,
    /// Last activity.
    pub last_activity_at: Option<NaiveDateTime>,
    /// Idle deadline.
    pub expires_at: Option<NaiveDateTime>,
    /// Completed turns.
    pub total_turns: Option<i32>,
    /// Winning seat, `Some(None)` for a draw.
    pub winner: Option<Option<String>>,
    /// Final score of seat one.
    pub final_score_one: Option<Option<i32>>,
    /// Final score of seat two.
    pub final_score_two: Option<Option<i32>>,
}

impl SessionChanges {
    /// Changes that bring the record in line with `session`.
    pub fn from_session(session: &GameSession) -> Self {
        let mut changes = Self {
            status: Some(session.status.as_ref().to_string()),
            player_two: Some(session.player_in(Seat::Two).map(|p| p.id.clone())),
            start_time: Some(session.started_at.map(|t| t.naive_utc())),
            last_activity_at: Some(session.last_activity_at.naive_utc()),
            expires_at: Some(session.expires_at.naive_utc()),
            total_turns: Some(session.total_turns() as i32),
            ..Self::default()
        };
        if let Some(outcome) = session.state.outcome() {
            changes.winner = Some(outcome.winner.map(|s| s.as_ref().to_string()));
            changes.final_score_one = Some(Some(outcome.scores.one as i32));
            changes.final_score_two = Some(Some(outcome.scores.two as i32));
        }
        changes
    }

    /// Only the status changes.
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status.as_ref().to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn apply_to(&self, record: &mut SessionRecord) {
        if let Some(status) = &self.status {
            record.status = status.clone();
        }
        if let Some(player_two) = &self.player_two {
            record.player_two = player_two.clone();
        }
        if let Some(start_time) = self.start_time {
            record.start_time = start_time;
        }
        if let Some(at) = self.last_activity_at {
            record.last_activity_at = at;
        }
        if let Some(at) = self.expires_at {
            record.expires_at = at;
        }
        if let Some(turns) = self.total_turns {
            record.total_turns = turns;
        }
        if let Some(winner) = &self.winner {
            record.winner = winner.clone();
        }
        if let Some(score) = self.final_score_one {
            record.final_score_one = score;
        }
        if let Some(score) = self.final_score_two {
            record.final_score_two = score;
        }
    }
}

/// One recorded move.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Identifiable, Selectable, Getters, Serialize)]
#[diesel(table_name = schema::move_log)]
pub struct MoveLogEntry {
    id: i32,
    session_id: String,
    sequence: i64,
    kind: String,
    x: Option<i64>,
    y: Option<i64>,
    player: String,
    score_one: i32,
    score_two: i32,
    recorded_at: NaiveDateTime,
}

impl MoveLogEntry {
    /// Rebuilds the recorded move.
    pub fn to_move(&self) -> Result<Move, DbError> {
        let kind = MoveKind::from_str(&self.kind)
            .map_err(|_| DbError::new(format!("Invalid move kind: '{}'", self.kind)))?;
        let player = Seat::from_str(&self.player)
            .map_err(|_| DbError::new(format!("Invalid seat: '{}'", self.player)))?;
        Ok(Move {
            kind,
            position: Position::new(self.x.unwrap_or(0), self.y.unwrap_or(0)),
            player,
            sequence: self.sequence as u64,
            timestamp_ms: self.recorded_at.and_utc().timestamp_millis(),
        })
    }

    /// Scores right after this move.
    pub fn scores(&self) -> Scores {
        Scores {
            one: self.score_one as u32,
            two: self.score_two as u32,
        }
    }
}

/// Insertable move log entry.
#[derive(Debug, Clone, Insertable, Getters, new)]
#[diesel(table_name = schema::move_log)]
pub struct NewMoveLogEntry {
    session_id: String,
    sequence: i64,
    kind: String,
    x: Option<i64>,
    y: Option<i64>,
    player: String,
    score_one: i32,
    score_two: i32,
    recorded_at: NaiveDateTime,
}

impl NewMoveLogEntry {
    /// Entry for `mv` with the scores it left behind.
    pub fn from_move(session_id: &str, mv: &Move, scores: Scores, recorded_at: NaiveDateTime) -> Self {
        let (x, y) = match mv.kind {
            MoveKind::Skip => (None, None),
            MoveKind::Place | MoveKind::Replace => (Some(mv.position.x), Some(mv.position.y)),
        };
        Self::new(
            session_id.to_string(),
            mv.sequence as i64,
            mv.kind.as_ref().to_string(),
            x,
            y,
            mv.player.as_ref().to_string(),
            scores.one as i32,
            scores.two as i32,
            recorded_at,
        )
    }

    pub(crate) fn into_entry(self, id: i32) -> MoveLogEntry {
        MoveLogEntry {
            id,
            session_id: self.session_id,
            sequence: self.sequence,
            kind: self.kind,
            x: self.x,
            y: self.y,
            player: self.player,
            score_one: self.score_one,
            score_two: self.score_two,
            recorded_at: self.recorded_at,
        }
    }
}
