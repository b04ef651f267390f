//! Tests for the SQLite session repository.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use diesel::{Connection, SqliteConnection};
use diesel_migrations::MigrationHarness;
use tempfile::NamedTempFile;
use toroid_rules::{Move, Position, Scores, Seat, create_initial_state};
use toroid_server::{
    GameSession, LifecycleSettings, MIGRATIONS, MemoryCache, MemoryRecords, MoveRequest,
    NewMoveLogEntry, NewSessionRecord, SessionChanges, SessionLifecycle, SessionRecords,
    SessionRepository, SessionStatus, SessionStore,
};

/// Creates a temporary database file and a repository over it. The file
/// handle must stay in scope to keep the file alive.
fn setup_test_db() -> (NamedTempFile, SessionRepository) {
    let db_file = NamedTempFile::new().expect("Failed to create temp file");
    let db_path = db_file.path().to_str().expect("Invalid path").to_string();
    let repo = SessionRepository::open(&db_path).expect("Failed to open repository");
    (db_file, repo)
}

fn session(id: &str, code: &str) -> GameSession {
    GameSession::new(
        id.to_string(),
        code.to_string(),
        "alice".to_string(),
        create_initial_state(),
        Utc::now(),
        chrono::Duration::minutes(10),
    )
}

#[test]
fn test_open_applies_all_migrations() {
    let (db, _repo) = setup_test_db();
    let mut conn =
        SqliteConnection::establish(db.path().to_str().unwrap()).expect("Failed to connect");
    assert!(!conn.has_pending_migration(MIGRATIONS).expect("Check failed"));
}

#[test]
fn test_reopen_is_idempotent() {
    let (db, repo) = setup_test_db();
    repo.create_session(&NewSessionRecord::from_session(&session("s1", "ABC123")))
        .expect("Create failed");
    let reopened = SessionRepository::open(db.path().to_str().unwrap()).expect("Reopen failed");
    assert!(reopened.find_session("s1").expect("Query failed").is_some());
}

#[test]
fn test_create_and_find_session() {
    let (_db, repo) = setup_test_db();
    let created = repo
        .create_session(&NewSessionRecord::from_session(&session("s1", "ABC123")))
        .expect("Create failed");
    assert_eq!(created.code(), "ABC123");
    assert_eq!(created.parse_status().unwrap(), SessionStatus::Waiting);
    assert_eq!(created.player_one().as_deref(), Some("alice"));
    assert!(created.player_two().is_none());
    assert_eq!(*created.board_width(), 10);

    let by_code = repo.find_by_code("ABC123").expect("Query failed");
    assert_eq!(by_code.map(|r| r.id().clone()), Some("s1".to_string()));
    assert!(repo.find_session("nope").expect("Query failed").is_none());
}

#[test]
fn test_duplicate_code_is_a_conflict() {
    let (_db, repo) = setup_test_db();
    repo.create_session(&NewSessionRecord::from_session(&session("s1", "ABC123")))
        .expect("First create failed");
    let err = repo
        .create_session(&NewSessionRecord::from_session(&session("s2", "ABC123")))
        .unwrap_err();
    assert!(err.is_conflict(), "Duplicate code should conflict: {}", err);
}

#[test]
fn test_update_session_partial() {
    let (_db, repo) = setup_test_db();
    repo.create_session(&NewSessionRecord::from_session(&session("s1", "ABC123")))
        .expect("Create failed");

    assert!(repo
        .update_session("s1", &SessionChanges::status(SessionStatus::Playing))
        .expect("Update failed"));
    let record = repo.find_session("s1").unwrap().unwrap();
    assert_eq!(record.status(), "playing");
    assert_eq!(record.code(), "ABC123");

    assert!(!repo
        .update_session("missing", &SessionChanges::status(SessionStatus::Expired))
        .expect("Update failed"));
}

#[test]
fn test_moves_come_back_in_sequence_order() {
    let (_db, repo) = setup_test_db();
    repo.create_session(&NewSessionRecord::from_session(&session("s1", "ABC123")))
        .expect("Create failed");
    let now = Utc::now().naive_utc();
    let entries = vec![
        NewMoveLogEntry::from_move(
            "s1",
            &Move::skip(Seat::Two, 1, 0),
            Scores { one: 1, two: 0 },
            now,
        ),
        NewMoveLogEntry::from_move(
            "s1",
            &Move::place(Seat::One, Position::new(3, 4), 0, 0),
            Scores { one: 1, two: 0 },
            now,
        ),
    ];
    assert_eq!(repo.append_moves(&entries).expect("Append failed"), 2);

    let moves = repo.moves_for_session("s1").expect("Query failed");
    assert_eq!(moves.len(), 2);
    let first = moves[0].to_move().unwrap();
    assert_eq!(first.position, Position::new(3, 4));
    assert_eq!(first.player, Seat::One);
    assert_eq!(*moves[1].kind(), "skip");
    assert!(moves[1].x().is_none());
}

#[test]
fn test_duplicate_sequence_rolls_back_batch() {
    let (_db, repo) = setup_test_db();
    repo.create_session(&NewSessionRecord::from_session(&session("s1", "ABC123")))
        .expect("Create failed");
    let now = Utc::now().naive_utc();
    let mv = Move::place(Seat::One, Position::new(0, 0), 0, 0);
    let entry = NewMoveLogEntry::from_move("s1", &mv, Scores { one: 1, two: 0 }, now);
    repo.append_moves(std::slice::from_ref(&entry))
        .expect("Append failed");

    let next = NewMoveLogEntry::from_move(
        "s1",
        &Move::place(Seat::Two, Position::new(1, 0), 1, 0),
        Scores { one: 1, two: 1 },
        now,
    );
    assert!(repo.append_moves(&[next, entry]).is_err());
    assert_eq!(repo.moves_for_session("s1").unwrap().len(), 1);
}

#[test]
fn test_stale_sessions() {
    let (_db, repo) = setup_test_db();
    repo.create_session(&NewSessionRecord::from_session(&session("live", "AAAAAA")))
        .expect("Create failed");
    repo.create_session(&NewSessionRecord::from_session(&session("done", "BBBBBB")))
        .expect("Create failed");
    repo.update_session("done", &SessionChanges::status(SessionStatus::Finished))
        .expect("Update failed");

    let now = Utc::now().naive_utc();
    assert!(repo.stale_sessions(now).unwrap().is_empty());

    let later = now + chrono::Duration::minutes(30);
    let stale: Vec<String> = repo
        .stale_sessions(later)
        .unwrap()
        .into_iter()
        .map(|r| r.id().clone())
        .collect();
    assert_eq!(stale, vec!["live".to_string()]);
}

/// Drives a lifecycle over a SQLite store and the in-memory one and
/// checks that both record the same history.
#[tokio::test]
async fn test_sqlite_and_memory_records_agree() {
    let (_db, repo) = setup_test_db();
    let sqlite: Arc<dyn SessionRecords> = Arc::new(repo);
    let memory: Arc<dyn SessionRecords> = Arc::new(MemoryRecords::new());

    let mut histories = Vec::new();
    for records in [sqlite, memory] {
        let cache = Arc::new(MemoryCache::new());
        let store = SessionStore::new(cache, Duration::from_secs(5), Duration::from_secs(600));
        let hub = toroid_server::ConnectionHub::new();
        let lifecycle = SessionLifecycle::new(
            store,
            Arc::clone(&records),
            Arc::new(hub),
            LifecycleSettings::default(),
        );

        let created = lifecycle.create("alice").await.unwrap();
        lifecycle
            .join("bob", None, Some(&created.code))
            .await
            .unwrap();
        let place = |x, y| MoveRequest {
            kind: toroid_rules::MoveKind::Place,
            position: Some(Position::new(x, y)),
        };
        lifecycle
            .make_move("alice", &created.id, place(0, 0), None)
            .await
            .unwrap();
        lifecycle
            .make_move("bob", &created.id, place(2, 2), None)
            .await
            .unwrap();
        lifecycle.end_turn("bob", &created.id, None).await.unwrap();

        let record = records.find_session(&created.id).await.unwrap().unwrap();
        assert_eq!(record.status(), "playing");
        assert_eq!(record.player_two().as_deref(), Some("bob"));
        assert!(record.start_time().is_some());

        let history: Vec<(i64, String, String, Option<i64>, Option<i64>)> = records
            .moves_for_session(&created.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| {
                (
                    *m.sequence(),
                    m.kind().clone(),
                    m.player().clone(),
                    *m.x(),
                    *m.y(),
                )
            })
            .collect();
        histories.push(history);
    }

    assert_eq!(histories[0].len(), 3);
    assert_eq!(histories[0], histories[1]);
}

