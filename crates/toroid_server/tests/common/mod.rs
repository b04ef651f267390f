//! Shared fixtures for the server integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use toroid_rules::{MoveKind, Position};
use toroid_server::{
    DbError, Delivery, EventSink, GameSession, LifecycleSettings, MemoryCache, MemoryRecords,
    MoveLogEntry, MoveRequest, NewMoveLogEntry, NewSessionRecord, ServerEvent, SessionChanges,
    SessionLifecycle, SessionRecord, SessionRecords, SessionStore,
};

/// Sink that keeps every delivery for inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl RecordingSink {
    /// Events addressed to `player`, oldest first.
    pub fn events_for(&self, player: &str) -> Vec<ServerEvent> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.recipients.iter().any(|r| r == player))
            .map(|d| d.envelope.event.clone())
            .collect()
    }

    /// Event names addressed to `player`.
    pub fn names_for(&self, player: &str) -> Vec<&'static str> {
        self.events_for(player).iter().map(|e| e.name()).collect()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.deliveries.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn deliver(&self, delivery: Delivery) {
        self.deliveries.lock().unwrap().push(delivery);
    }
}

/// Records whose writes can be made to fail on demand.
///
/// Reads and inserts always reach the wrapped [`MemoryRecords`].
#[derive(Debug, Clone, Default)]
pub struct FailingRecords {
    inner: MemoryRecords,
    fail_updates: Arc<AtomicBool>,
    fail_appends: Arc<AtomicBool>,
}

impl FailingRecords {
    /// Makes `update_session` fail from now on.
    pub fn fail_updates(&self) {
        self.fail_updates.store(true, Ordering::SeqCst);
    }

    /// Makes `append_moves` fail from now on.
    pub fn fail_appends(&self) {
        self.fail_appends.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionRecords for FailingRecords {
    async fn create_session(&self, record: NewSessionRecord) -> Result<SessionRecord, DbError> {
        self.inner.create_session(record).await
    }

    async fn find_session(&self, id: &str) -> Result<Option<SessionRecord>, DbError> {
        self.inner.find_session(id).await
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<SessionRecord>, DbError> {
        self.inner.find_by_code(code).await
    }

    async fn update_session(&self, id: &str, changes: SessionChanges) -> Result<bool, DbError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(DbError::new("database is locked"));
        }
        self.inner.update_session(id, changes).await
    }

    async fn append_moves(&self, entries: Vec<NewMoveLogEntry>) -> Result<usize, DbError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(DbError::new("disk I/O error"));
        }
        self.inner.append_moves(entries).await
    }

    async fn moves_for_session(&self, session_id: &str) -> Result<Vec<MoveLogEntry>, DbError> {
        self.inner.moves_for_session(session_id).await
    }

    async fn stale_sessions(&self, now: NaiveDateTime) -> Result<Vec<SessionRecord>, DbError> {
        self.inner.stale_sessions(now).await
    }
}

/// A lifecycle over in-memory collaborators.
pub struct Harness {
    pub lifecycle: SessionLifecycle,
    pub cache: MemoryCache,
    pub records: MemoryRecords,
    pub sink: RecordingSink,
}

pub const LOCK_TTL: Duration = Duration::from_secs(5);

pub fn harness() -> Harness {
    harness_with(LifecycleSettings::default())
}

pub fn harness_with(settings: LifecycleSettings) -> Harness {
    let records = MemoryRecords::new();
    build(Arc::new(records.clone()), records, settings)
}

/// A harness whose durable writes fail once told to. `records` on the
/// harness reads what actually got written.
pub fn failing_harness() -> (Harness, FailingRecords) {
    let failing = FailingRecords::default();
    let harness = build(
        Arc::new(failing.clone()),
        failing.inner.clone(),
        LifecycleSettings::default(),
    );
    (harness, failing)
}

fn build(
    durable: Arc<dyn SessionRecords>,
    records: MemoryRecords,
    settings: LifecycleSettings,
) -> Harness {
    let cache = MemoryCache::new();
    let sink = RecordingSink::default();
    let store = SessionStore::new(Arc::new(cache.clone()), LOCK_TTL, settings.session_ttl);
    let lifecycle = SessionLifecycle::new(store, durable, Arc::new(sink.clone()), settings);
    Harness {
        lifecycle,
        cache,
        records,
        sink,
    }
}

pub fn place(x: i64, y: i64) -> MoveRequest {
    MoveRequest {
        kind: MoveKind::Place,
        position: Some(Position::new(x, y)),
    }
}

/// Creates a session for `one` and seats `two` in it.
pub async fn started(harness: &Harness, one: &str, two: &str) -> GameSession {
    let created = harness.lifecycle.create(one).await.unwrap();
    harness
        .lifecycle
        .join(two, Some(&created.id), None)
        .await
        .unwrap()
}
