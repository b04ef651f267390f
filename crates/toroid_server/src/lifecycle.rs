//! Session lifecycle state machine.
//!
//! ```text
//! create ──> WAITING ──join──> PLAYING ──board full──> FINISHED
//!               │                 │
//!               └──── grace / idle timeout ────> EXPIRED
//! ```
//!
//! Every mutation runs under the session lock and revalidates against
//! the state loaded inside it. Events go out after the lock is released.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use toroid_rules::{
    Move, MoveKind, Position, Scores, Seat, SequenceMatches, Transition, apply_move,
    create_initial_state_with,
};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::db::{NewMoveLogEntry, NewSessionRecord, SessionChanges, SessionRecords};
use crate::error::{SessionError, SessionErrorKind, ValidationError};
use crate::events::{Delivery, EventSink, ServerEvent};
use crate::protocol::MoveRequest;
use crate::session::{GameSession, PlayerId, SessionId, SessionStatus};
use crate::store::{LockedSession, SessionStore};

/// Attempts at finding an unused join code.
pub const MAX_CODE_ATTEMPTS: usize = 8;

/// Characters of generated join codes. No 0/O or 1/I.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Lock attempts for server-initiated work (timers, disconnects, sweeps).
/// Client commands are never retried.
const HOUSEKEEPING_ATTEMPTS: u32 = 5;

/// Pause between housekeeping lock attempts, multiplied by the attempt.
const HOUSEKEEPING_BACKOFF: Duration = Duration::from_millis(50);

/// Tunables of the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// Board columns of new sessions.
    pub board_width: usize,
    /// Board rows of new sessions.
    pub board_height: usize,
    /// Idle lifetime of a session.
    pub session_ttl: Duration,
    /// Reconnect window.
    pub grace_period: Duration,
    /// How long a finished session stays readable.
    pub finish_linger: Duration,
    /// Length of join codes.
    pub code_length: usize,
}

impl From<&ServerConfig> for LifecycleSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            board_width: *config.board_width(),
            board_height: *config.board_height(),
            session_ttl: config.session_ttl(),
            grace_period: config.grace_period(),
            finish_linger: config.finish_linger(),
            code_length: *config.code_length(),
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

#[derive(Debug, Default)]
struct Timers {
    grace: HashMap<(SessionId, PlayerId), AbortHandle>,
    linger: HashMap<SessionId, AbortHandle>,
}

/// Result of a move under the lock, broadcast after release.
struct Applied {
    session: GameSession,
    transition: Transition,
}

/// Drives sessions through their lifecycle.
#[derive(Clone)]
pub struct SessionLifecycle {
    store: SessionStore,
    records: Arc<dyn SessionRecords>,
    sink: Arc<dyn EventSink>,
    settings: LifecycleSettings,
    timers: Arc<Mutex<Timers>>,
}

impl std::fmt::Debug for SessionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLifecycle")
            .field("store", &self.store)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SessionLifecycle {
    /// Wires the lifecycle to its collaborators.
    pub fn new(
        store: SessionStore,
        records: Arc<dyn SessionRecords>,
        sink: Arc<dyn EventSink>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            store,
            records,
            sink,
            settings,
            timers: Arc::new(Mutex::new(Timers::default())),
        }
    }

    /// The session store.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// The durable store.
    pub fn records(&self) -> &Arc<dyn SessionRecords> {
        &self.records
    }

    /// Active settings.
    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    // ─────────────────────────────────────────────────────────────
    //  Client commands
    // ─────────────────────────────────────────────────────────────

    /// Opens a session with `player` in seat one.
    #[instrument(skip(self))]
    pub async fn create(&self, player: &str) -> Result<GameSession, SessionError> {
        let state = create_initial_state_with(self.settings.board_width, self.settings.board_height)
            .map_err(|e| SessionError::new(SessionErrorKind::Internal(e.to_string())))?;
        let ttl = chrono_ttl(self.settings.session_ttl);

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let session = GameSession::new(
                Uuid::new_v4().to_string(),
                generate_code(self.settings.code_length),
                player.to_string(),
                state.clone(),
                Utc::now(),
                ttl,
            );

            match self
                .records
                .create_session(NewSessionRecord::from_session(&session))
                .await
            {
                Ok(_) => {}
                Err(e) if e.is_conflict() => {
                    debug!(attempt, code = %session.code, "Join code taken, regenerating");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            if !self.store.insert_new(&session).await? {
                warn!(attempt, code = %session.code, "Join code live in cache but not recorded");
                self.records
                    .update_session(&session.id, SessionChanges::status(SessionStatus::Expired))
                    .await?;
                continue;
            }

            info!(session_id = %session.id, code = %session.code, "Session created");
            self.emit(
                vec![player.to_string()],
                ServerEvent::GameCreated {
                    session_id: session.id.clone(),
                    code: session.code.clone(),
                    player_id: player.to_string(),
                    player_number: Seat::One.number(),
                },
            )
            .await;
            return Ok(session);
        }

        error!(attempts = MAX_CODE_ATTEMPTS, "Could not allocate a join code");
        Err(SessionError::storage("Could not allocate a unique join code"))
    }

    /// Seats `player` in seat two of a waiting session, by id or code.
    #[instrument(skip(self))]
    pub async fn join(
        &self,
        player: &str,
        session_id: Option<&str>,
        code: Option<&str>,
    ) -> Result<GameSession, SessionError> {
        let id = match (session_id, code) {
            (Some(id), _) => id.to_string(),
            (None, Some(code)) => self.resolve_code(code).await?,
            (None, None) => {
                return Err(SessionError::validation(ValidationError::BadRequest(
                    "join_game needs a sessionId or a code".to_string(),
                )));
            }
        };

        let records = Arc::clone(&self.records);
        let ttl = chrono_ttl(self.settings.session_ttl);
        let joiner = player.to_string();
        let session = self
            .locked(&id, |mut locked| async move {
                let mut next = locked.session().clone();
                let now = Utc::now();
                next.seat_second(joiner, now)?;
                next.touch(now, ttl);
                locked.save(next.clone()).await?;
                records
                    .update_session(&next.id, SessionChanges::from_session(&next))
                    .await?;
                Ok(next)
            })
            .await?;

        info!(session_id = %session.id, "Session started");
        self.emit(
            vec![player.to_string()],
            ServerEvent::GameJoined {
                session_id: session.id.clone(),
                status: session.status,
                player_number: Seat::Two.number(),
            },
        )
        .await;
        self.emit(
            session.player_ids(),
            ServerEvent::GameStarted {
                session_id: session.id.clone(),
                state: session.state.clone(),
                current_player: session.state.current_player(),
            },
        )
        .await;
        Ok(session)
    }

    /// Applies a move submitted by `player`.
    #[instrument(skip(self, request), fields(kind = ?request.kind))]
    pub async fn make_move(
        &self,
        player: &str,
        session_id: &str,
        request: MoveRequest,
        expected_sequence: Option<u64>,
    ) -> Result<GameSession, SessionError> {
        if request.kind == MoveKind::Place && request.position.is_none() {
            return Err(SessionError::validation(ValidationError::BadRequest(
                "place moves need a position".to_string(),
            )));
        }
        self.apply(player, session_id, request, expected_sequence).await
    }

    /// Ends `player`'s turn early by applying a skip move.
    #[instrument(skip(self))]
    pub async fn end_turn(
        &self,
        player: &str,
        session_id: &str,
        expected_sequence: Option<u64>,
    ) -> Result<GameSession, SessionError> {
        let request = MoveRequest {
            kind: MoveKind::Skip,
            position: None,
        };
        self.apply(player, session_id, request, expected_sequence).await
    }

    /// Resumes `player`'s seat after a dropped connection.
    #[instrument(skip(self))]
    pub async fn reconnect(
        &self,
        player: &str,
        session_id: &str,
    ) -> Result<GameSession, SessionError> {
        let records = Arc::clone(&self.records);
        let ttl = chrono_ttl(self.settings.session_ttl);
        let returning = player.to_string();
        let (session, seat) = self
            .locked(session_id, |mut locked| async move {
                let mut next = locked.session().clone();
                if next.status == SessionStatus::Expired {
                    return Err(SessionError::expired(next.id.clone()));
                }
                let now = Utc::now();
                let seat = next.set_connected(&returning, true, now)?;
                next.touch(now, ttl);
                locked.save(next.clone()).await?;
                records
                    .update_session(&next.id, SessionChanges::from_session(&next))
                    .await?;
                Ok((next, seat))
            })
            .await?;

        self.cancel_grace(session_id, player).await;
        info!(session_id, seat = %seat, "Player reconnected");
        self.emit(
            session.player_ids(),
            ServerEvent::PlayerReconnected {
                session_id: session.id.clone(),
                player_number: seat.number(),
                state: session.state.clone(),
            },
        )
        .await;
        Ok(session)
    }

    /// Sends the current session to `player`. Lock free.
    #[instrument(skip(self))]
    pub async fn snapshot(
        &self,
        player: &str,
        session_id: &str,
    ) -> Result<GameSession, SessionError> {
        let session = self.current(session_id).await?;
        self.emit(
            vec![player.to_string()],
            ServerEvent::SessionSnapshot {
                session: session.clone(),
            },
        )
        .await;
        Ok(session)
    }

    /// Current session without locking or emitting anything.
    pub async fn current(&self, session_id: &str) -> Result<GameSession, SessionError> {
        match self.store.get(session_id).await? {
            Some(session) => Ok(session),
            None => Err(self.missing(session_id).await),
        }
    }

    // ─────────────────────────────────────────────────────────────
    //  Connection events
    // ─────────────────────────────────────────────────────────────

    /// Marks `player` disconnected and starts their grace timer.
    ///
    /// Leaves the status alone. Does nothing for finished or unknown
    /// sessions.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, player: &str, session_id: &str) -> Result<(), SessionError> {
        let leaving = player.to_string();
        let result = self
            .retry_contended(|| {
                let leaving = leaving.clone();
                self.store
                    .with_session_lock(session_id, |mut locked| async move {
                        let mut next = locked.session().clone();
                        if next.status.is_terminal() {
                            return Ok(None);
                        }
                        let seat = next.set_connected(&leaving, false, Utc::now())?;
                        locked.save(next.clone()).await?;
                        Ok(Some((next, seat)))
                    })
            })
            .await;

        let (session, seat) = match result {
            Ok(Some(found)) => found,
            Ok(None) => return Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("Disconnect for a session no longer cached");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        info!(seat = %seat, grace_secs = self.settings.grace_period.as_secs(), "Player disconnected");
        self.start_grace(session_id, player).await;
        self.emit(
            session.others(player),
            ServerEvent::PlayerDisconnected {
                session_id: session.id.clone(),
                player_number: seat.number(),
                grace_seconds: self.settings.grace_period.as_secs(),
            },
        )
        .await;
        Ok(())
    }

    /// Expires the session if `player` is still away once the grace
    /// window has elapsed. Returns true if it expired.
    #[instrument(skip(self))]
    pub async fn expire_after_grace(
        &self,
        session_id: &str,
        player: &str,
    ) -> Result<bool, SessionError> {
        let away = player.to_string();
        let expired = self
            .expire_if(session_id, "grace_elapsed", move |session| {
                !session.status.is_terminal()
                    && session
                        .players
                        .iter()
                        .any(|p| p.id == away && !p.connected)
            })
            .await?;
        Ok(expired)
    }

    /// Expires idle waiting or playing sessions whose deadline passed.
    /// Returns how many were expired.
    #[instrument(skip(self))]
    pub async fn reap_idle(&self, now: DateTime<Utc>) -> Result<usize, SessionError> {
        let stale = self.records.stale_sessions(now.naive_utc()).await?;
        let mut reaped = 0;
        for record in stale {
            let id = record.id().clone();
            let expired = self
                .expire_if(&id, "idle", move |session| {
                    !session.status.is_terminal() && session.expires_at <= now
                })
                .await;
            match expired {
                Ok(true) => reaped += 1,
                Ok(false) => {}
                Err(e) if e.is_not_found() => {
                    // Cache entry already lapsed; only the record is left.
                    self.records
                        .update_session(&id, SessionChanges::status(SessionStatus::Expired))
                        .await?;
                    reaped += 1;
                }
                Err(e) => warn!(session_id = %id, error = %e, "Failed to reap session"),
            }
        }
        if reaped > 0 {
            info!(reaped, "Reaped idle sessions");
        }
        Ok(reaped)
    }

    /// Evicts a finished session and marks its record expired.
    #[instrument(skip(self))]
    pub async fn retire_finished(&self, session_id: &str) -> Result<bool, SessionError> {
        let result = self
            .retry_contended(|| {
                self.store
                    .with_session_lock(session_id, |locked| async move {
                        if locked.session().status != SessionStatus::Finished {
                            return Ok(false);
                        }
                        locked.evict().await?;
                        Ok(true)
                    })
            })
            .await;

        let retired = match result {
            Ok(retired) => retired,
            Err(e) if e.is_not_found() => true,
            Err(e) => return Err(e),
        };
        if retired {
            self.records
                .update_session(session_id, SessionChanges::status(SessionStatus::Expired))
                .await?;
            self.clear_session_timers(session_id).await;
            debug!("Finished session retired");
        }
        Ok(retired)
    }

    // ─────────────────────────────────────────────────────────────
    //  Internals
    // ─────────────────────────────────────────────────────────────

    async fn apply(
        &self,
        player: &str,
        session_id: &str,
        request: MoveRequest,
        expected_sequence: Option<u64>,
    ) -> Result<GameSession, SessionError> {
        let records = Arc::clone(&self.records);
        let ttl = chrono_ttl(self.settings.session_ttl);
        let mover = player.to_string();

        let Applied {
            session,
            transition,
        } = self
            .locked(session_id, |mut locked| async move {
                let current = locked.session().clone();
                if current.status != SessionStatus::Playing {
                    return Err(SessionError::validation(ValidationError::NotPlaying(
                        current.status,
                    )));
                }
                let seat = current.seat_of(&mover).ok_or(ValidationError::NotSeated)?;
                let state = &current.state;
                if let Some(expected) = expected_sequence {
                    SequenceMatches::check(state, expected)?;
                }

                let now = Utc::now();
                let mv = Move {
                    kind: request.kind,
                    position: request.position.unwrap_or(Position::new(0, 0)),
                    player: seat,
                    sequence: state.sequence(),
                    timestamp_ms: now.timestamp_millis(),
                };
                let transition = apply_move(state, &mv, seat)?;

                let mut next = current.clone();
                next.state = transition.state.clone();
                next.touch(now, ttl);
                if next.state.is_over() {
                    next.status = SessionStatus::Finished;
                }
                locked.save(next.clone()).await?;

                records
                    .update_session(&next.id, SessionChanges::from_session(&next))
                    .await?;
                let trail = score_trail(current.state.scores(), &transition.applied);
                let entries = transition
                    .applied
                    .iter()
                    .zip(trail)
                    .map(|(mv, scores)| {
                        NewMoveLogEntry::from_move(&next.id, mv, scores, now.naive_utc())
                    })
                    .collect();
                records.append_moves(entries).await?;

                Ok(Applied {
                    session: next,
                    transition,
                })
            })
            .await?;

        let recipients = session.player_ids();
        let state = session.state.clone();
        if request.kind == MoveKind::Skip {
            self.emit(
                recipients.clone(),
                ServerEvent::TurnEnded {
                    session_id: session.id.clone(),
                    next_player: state.current_player(),
                    state: state.clone(),
                },
            )
            .await;
        } else {
            self.emit(
                recipients.clone(),
                ServerEvent::GameStateUpdated {
                    session_id: session.id.clone(),
                    current_player: state.current_player(),
                    captured: transition.captured(),
                    applied: transition.applied.clone(),
                    state: state.clone(),
                },
            )
            .await;
        }

        if let Some(outcome) = state.outcome() {
            info!(winner = ?outcome.winner, scores = ?outcome.scores, "Game finished");
            self.emit(
                recipients,
                ServerEvent::GameOver {
                    session_id: session.id.clone(),
                    winner: outcome.winner,
                    scores: outcome.scores,
                    state: state.clone(),
                },
            )
            .await;
            self.schedule_retirement(&session.id).await;
        }
        Ok(session)
    }

    /// Runs `f` under the session lock, mapping an uncached session to
    /// expired or not-found from its durable record.
    async fn locked<F, Fut, T>(&self, session_id: &str, f: F) -> Result<T, SessionError>
    where
        F: FnOnce(LockedSession) -> Fut,
        Fut: Future<Output = Result<T, SessionError>>,
    {
        match self.store.with_session_lock(session_id, f).await {
            Err(e) if e.is_not_found() => Err(self.missing(session_id).await),
            other => other,
        }
    }

    /// Error for a session that isn't in the cache.
    async fn missing(&self, session_id: &str) -> SessionError {
        match self.records.find_session(session_id).await {
            Ok(Some(record)) => match record.parse_status() {
                Ok(status) if status.is_terminal() => SessionError::expired(session_id),
                Ok(_) if record.expires_at() < &Utc::now().naive_utc() => {
                    SessionError::expired(session_id)
                }
                Ok(_) => SessionError::not_found(session_id),
                Err(e) => e.into(),
            },
            Ok(None) => SessionError::not_found(session_id),
            Err(e) => e.into(),
        }
    }

    async fn resolve_code(&self, code: &str) -> Result<SessionId, SessionError> {
        if let Some(id) = self.store.resolve_code(code).await? {
            return Ok(id);
        }
        let code = code.to_uppercase();
        match self.records.find_by_code(&code).await? {
            Some(record) => Err(self.missing(record.id()).await),
            None => Err(SessionError::not_found(code)),
        }
    }

    /// Retries `op` while it fails on lock contention.
    async fn retry_contended<T, F, Fut>(&self, mut op: F) -> Result<T, SessionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SessionError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_concurrency() && attempt < HOUSEKEEPING_ATTEMPTS => {
                    debug!(attempt, "Session busy, retrying housekeeping");
                    tokio::time::sleep(HOUSEKEEPING_BACKOFF * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Expires the session if `should` holds for its fresh state.
    async fn expire_if<P>(
        &self,
        session_id: &str,
        reason: &str,
        should: P,
    ) -> Result<bool, SessionError>
    where
        P: Fn(&GameSession) -> bool,
    {
        let records = Arc::clone(&self.records);
        let should = &should;
        let expired = self
            .retry_contended(|| {
                let records = Arc::clone(&records);
                self.store
                    .with_session_lock(session_id, |locked| async move {
                        if !should(locked.session()) {
                            return Ok(None);
                        }
                        let mut session = locked.evict().await?;
                        session.status = SessionStatus::Expired;
                        records
                            .update_session(&session.id, SessionChanges::from_session(&session))
                            .await?;
                        Ok(Some(session))
                    })
            })
            .await?;

        let Some(session) = expired else {
            return Ok(false);
        };
        info!(session_id, reason, "Session expired");
        self.clear_session_timers(session_id).await;
        self.emit(
            session.player_ids(),
            ServerEvent::GameExpired {
                session_id: session.id.clone(),
                reason: reason.to_string(),
            },
        )
        .await;
        Ok(true)
    }

    async fn start_grace(&self, session_id: &str, player: &str) {
        let key = (session_id.to_string(), player.to_string());
        let lifecycle = self.clone();
        let grace = self.settings.grace_period;
        let (sid, pid) = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            lifecycle
                .timers
                .lock()
                .await
                .grace
                .remove(&(sid.clone(), pid.clone()));
            if let Err(e) = lifecycle.expire_after_grace(&sid, &pid).await {
                warn!(session_id = %sid, player_id = %pid, error = %e, "Grace expiry failed");
            }
        });
        if let Some(previous) = self
            .timers
            .lock()
            .await
            .grace
            .insert(key, handle.abort_handle())
        {
            previous.abort();
        }
    }

    async fn cancel_grace(&self, session_id: &str, player: &str) {
        let key = (session_id.to_string(), player.to_string());
        if let Some(handle) = self.timers.lock().await.grace.remove(&key) {
            handle.abort();
            debug!(session_id, player_id = player, "Grace timer cancelled");
        }
    }

    async fn schedule_retirement(&self, session_id: &str) {
        let lifecycle = self.clone();
        let linger = self.settings.finish_linger;
        let sid = session_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            lifecycle.timers.lock().await.linger.remove(&sid);
            if let Err(e) = lifecycle.retire_finished(&sid).await {
                warn!(session_id = %sid, error = %e, "Failed to retire finished session");
            }
        });
        self.timers
            .lock()
            .await
            .linger
            .insert(session_id.to_string(), handle.abort_handle());
    }

    /// Cancels outstanding grace timers of a session.
    async fn clear_session_timers(&self, session_id: &str) {
        let mut timers = self.timers.lock().await;
        timers.grace.retain(|(sid, _), handle| {
            if sid == session_id {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    /// Number of pending grace timers.
    pub async fn pending_grace_timers(&self) -> usize {
        self.timers.lock().await.grace.len()
    }

    async fn emit(&self, recipients: Vec<PlayerId>, event: ServerEvent) {
        if recipients.is_empty() {
            return;
        }
        debug!(event = event.name(), recipients = recipients.len(), "Emitting event");
        self.sink.deliver(Delivery::to(recipients, event)).await;
    }
}

/// Scores after each of `applied`, starting from `before`.
pub fn score_trail(before: Scores, applied: &[Move]) -> Vec<Scores> {
    let mut scores = before;
    applied
        .iter()
        .map(|mv| {
            match mv.kind {
                MoveKind::Place => bump(&mut scores, mv.player, 1),
                MoveKind::Replace => {
                    bump(&mut scores, mv.player, 1);
                    bump(&mut scores, mv.player.opponent(), -1);
                }
                MoveKind::Skip => {}
            }
            scores
        })
        .collect()
}

fn bump(scores: &mut Scores, seat: Seat, delta: i32) {
    let slot = match seat {
        Seat::One => &mut scores.one,
        Seat::Two => &mut scores.two,
    };
    *slot = slot.saturating_add_signed(delta);
}

/// Random join code of `length` characters.
pub fn generate_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

fn chrono_ttl(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365))
}
