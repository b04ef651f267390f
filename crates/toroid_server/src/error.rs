//! Session error types.

use derive_more::{Display, Error};
use toroid_rules::MoveError;
use tracing::instrument;

use crate::session::SessionStatus;

/// Non-fatal rejection of a command, reported to the acting client only.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ValidationError {
    /// The rule engine rejected the move.
    #[display("{}", _0)]
    Rule(MoveError),

    /// Sessions can only be joined while waiting for a second player.
    #[display("Session is {} and cannot be joined", _0)]
    NotJoinable(SessionStatus),

    /// The session does not accept moves in its current status.
    #[display("Session is {}, not playing", _0)]
    NotPlaying(SessionStatus),

    /// The player already holds a seat in this session.
    #[display("Player is already seated in this session")]
    AlreadySeated,

    /// The player holds no seat in this session.
    #[display("Player is not seated in this session")]
    NotSeated,

    /// The request itself is malformed.
    #[display("Invalid request: {}", _0)]
    BadRequest(String),
}

impl std::error::Error for ValidationError {}

/// Error categories, each with a stable wire code.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum SessionErrorKind {
    /// Bad move or wrong phase.
    #[display("{}", _0)]
    Validation(ValidationError),

    /// Another command holds the session lock. Retrying is up to the caller.
    #[display("Session {} is busy, retry the command", _0)]
    Concurrency(String),

    /// Unknown session id or code.
    #[display("Session {} not found", _0)]
    NotFound(String),

    /// The durable store or cache failed.
    #[display("Storage failure: {}", _0)]
    Storage(String),

    /// The session's grace window elapsed.
    #[display("Session {} has expired", _0)]
    Expired(String),

    /// The rule engine broke one of its own invariants.
    #[display("Internal error: {}", _0)]
    Internal(String),
}

impl SessionErrorKind {
    /// Stable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Concurrency(_) => "concurrency_error",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "storage_error",
            Self::Expired(_) => "expired",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Message safe to show to clients. Storage details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Storage(_) | Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Session error with location tracking.
#[derive(Debug, Clone, Display, Error)]
#[display("Session error: {} at {}:{}", kind, file, line)]
pub struct SessionError {
    /// What went wrong.
    pub kind: SessionErrorKind,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl SessionError {
    /// Creates a new session error with caller location tracking.
    #[track_caller]
    #[instrument]
    pub fn new(kind: SessionErrorKind) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            kind,
            line: loc.line(),
            file: loc.file(),
        }
    }

    /// Validation failure.
    #[track_caller]
    pub fn validation(err: ValidationError) -> Self {
        Self::new(SessionErrorKind::Validation(err))
    }

    /// Lock unavailable.
    #[track_caller]
    pub fn concurrency(session_id: impl Into<String>) -> Self {
        Self::new(SessionErrorKind::Concurrency(session_id.into()))
    }

    /// Unknown session.
    #[track_caller]
    pub fn not_found(session: impl Into<String>) -> Self {
        Self::new(SessionErrorKind::NotFound(session.into()))
    }

    /// Storage failure.
    #[track_caller]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(SessionErrorKind::Storage(message.into()))
    }

    /// Expired session.
    #[track_caller]
    pub fn expired(session_id: impl Into<String>) -> Self {
        Self::new(SessionErrorKind::Expired(session_id.into()))
    }

    /// True for lock contention.
    pub fn is_concurrency(&self) -> bool {
        matches!(self.kind, SessionErrorKind::Concurrency(_))
    }

    /// True for an unknown session.
    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, SessionErrorKind::NotFound(_))
    }
}

impl From<MoveError> for SessionError {
    #[track_caller]
    fn from(err: MoveError) -> Self {
        if err.is_internal() {
            Self::new(SessionErrorKind::Internal(err.to_string()))
        } else {
            Self::validation(ValidationError::Rule(err))
        }
    }
}

impl From<ValidationError> for SessionError {
    #[track_caller]
    fn from(err: ValidationError) -> Self {
        Self::validation(err)
    }
}

impl From<crate::db::DbError> for SessionError {
    #[track_caller]
    fn from(err: crate::db::DbError) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<crate::cache::CacheError> for SessionError {
    #[track_caller]
    fn from(err: crate::cache::CacheError) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Self::storage(format!("Serialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(SessionError::concurrency("s").kind.code(), "concurrency_error");
        assert_eq!(SessionError::not_found("s").kind.code(), "not_found");
        assert_eq!(SessionError::expired("s").kind.code(), "expired");
        assert_eq!(SessionError::storage("disk").kind.code(), "storage_error");
        assert_eq!(
            SessionError::from(MoveError::GameOver).kind.code(),
            "validation_error"
        );
    }

    #[test]
    fn test_storage_details_are_not_public() {
        let err = SessionError::storage("disk /var/db is full");
        assert_eq!(err.kind.public_message(), "Internal server error");
        assert!(err.to_string().contains("disk /var/db is full"));
    }

    #[test]
    fn test_engine_invariant_is_not_a_validation_error() {
        let err = SessionError::from(MoveError::CaptureDidNotSettle(100));
        assert_eq!(err.kind.code(), "internal_error");
    }

    #[test]
    fn test_location_is_recorded() {
        let err = SessionError::not_found("abc");
        assert!(err.file.ends_with("error.rs"));
        assert!(err.line > 0);
    }
}
