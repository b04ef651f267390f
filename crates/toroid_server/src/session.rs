//! Game session model.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use toroid_rules::{GameState, Seat};
use tracing::{debug, info, instrument, warn};

use crate::error::ValidationError;

/// Unique identifier for a game session.
pub type SessionId = String;

/// Unique identifier for a player.
pub type PlayerId = String;

/// Maximum number of seated players.
pub const MAX_PLAYERS: usize = 2;

/// Where a session is in its lifecycle.
///
/// Moves forward only: waiting, then playing, then finished or expired.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    derive_more::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SessionStatus {
    /// One player seated, waiting for an opponent.
    #[display("waiting")]
    Waiting,
    /// Both seats filled, moves flowing.
    #[display("playing")]
    Playing,
    /// The board filled up.
    #[display("finished")]
    Finished,
    /// Reclaimed after a disconnect or idle timeout.
    #[display("expired")]
    Expired,
}

impl SessionStatus {
    /// True for finished and expired sessions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Expired)
    }
}

/// A player holding a seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeatedPlayer {
    /// Player's unique ID.
    pub id: PlayerId,
    /// Which seat the player holds.
    pub seat: Seat,
    /// False between a disconnect and the matching reconnect.
    pub connected: bool,
    /// When the player last dropped.
    pub disconnected_at: Option<DateTime<Utc>>,
}

/// A game session between up to two players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
    /// Session ID.
    pub id: SessionId,
    /// Short join code.
    pub code: String,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Seated players in seat order.
    pub players: Vec<SeatedPlayer>,
    /// Current game state.
    pub state: GameState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When the second player joined.
    pub started_at: Option<DateTime<Utc>>,
    /// Last mutation.
    pub last_activity_at: DateTime<Utc>,
    /// When the session is reclaimed if nothing happens.
    pub expires_at: DateTime<Utc>,
}

impl GameSession {
    /// Creates a waiting session with the creator in seat one.
    #[instrument(skip(state), fields(session_id = %id, creator = %creator))]
    pub fn new(
        id: SessionId,
        code: String,
        creator: PlayerId,
        state: GameState,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        info!("Creating new game session");
        Self {
            id,
            code,
            status: SessionStatus::Waiting,
            players: vec![SeatedPlayer {
                id: creator,
                seat: Seat::One,
                connected: true,
                disconnected_at: None,
            }],
            state,
            created_at: now,
            started_at: None,
            last_activity_at: now,
            expires_at: now + ttl,
        }
    }

    /// Seats the second player and starts the game.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn seat_second(
        &mut self,
        player: PlayerId,
        now: DateTime<Utc>,
    ) -> Result<Seat, ValidationError> {
        if self.status != SessionStatus::Waiting {
            warn!(status = %self.status, "Join rejected");
            return Err(ValidationError::NotJoinable(self.status));
        }
        if self.seat_of(&player).is_some() {
            warn!(player_id = %player, "Player already seated");
            return Err(ValidationError::AlreadySeated);
        }
        if self.players.len() >= MAX_PLAYERS {
            return Err(ValidationError::NotJoinable(self.status));
        }
        info!(player_id = %player, "Seating second player");
        self.players.push(SeatedPlayer {
            id: player,
            seat: Seat::Two,
            connected: true,
            disconnected_at: None,
        });
        self.status = SessionStatus::Playing;
        self.started_at = Some(now);
        Ok(Seat::Two)
    }

    /// Seat held by `player`.
    pub fn seat_of(&self, player: &str) -> Option<Seat> {
        self.players.iter().find(|p| p.id == player).map(|p| p.seat)
    }

    /// Player in `seat`.
    pub fn player_in(&self, seat: Seat) -> Option<&SeatedPlayer> {
        self.players.iter().find(|p| p.seat == seat)
    }

    /// IDs of every seated player.
    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.players.iter().map(|p| p.id.clone()).collect()
    }

    /// IDs of every seated player except `player`.
    pub fn others(&self, player: &str) -> Vec<PlayerId> {
        self.players
            .iter()
            .filter(|p| p.id != player)
            .map(|p| p.id.clone())
            .collect()
    }

    /// Checks if it's the given player's turn.
    pub fn is_players_turn(&self, player: &str) -> bool {
        let is_turn = self.seat_of(player) == Some(self.state.current_player());
        debug!(player, is_turn, "Checked if player's turn");
        is_turn
    }

    /// Marks a player connected or disconnected.
    pub fn set_connected(
        &mut self,
        player: &str,
        connected: bool,
        now: DateTime<Utc>,
    ) -> Result<Seat, ValidationError> {
        let seated = self
            .players
            .iter_mut()
            .find(|p| p.id == player)
            .ok_or(ValidationError::NotSeated)?;
        seated.connected = connected;
        seated.disconnected_at = if connected { None } else { Some(now) };
        Ok(seated.seat)
    }

    /// True while any seated player is disconnected.
    pub fn has_disconnected_player(&self) -> bool {
        self.players.iter().any(|p| !p.connected)
    }

    /// Records activity and pushes the idle deadline out.
    pub fn touch(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.last_activity_at = now;
        self.expires_at = now + ttl;
    }

    /// Completed turns.
    pub fn total_turns(&self) -> u32 {
        self.state.turn().number.saturating_sub(1)
    }
}
