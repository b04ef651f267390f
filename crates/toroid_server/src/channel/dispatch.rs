//! Command dispatch.

use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::channel::{ConnectionHub, ConnectionId};
use crate::error::{SessionError, SessionErrorKind, ValidationError};
use crate::events::{EventEnvelope, ServerEvent};
use crate::lifecycle::SessionLifecycle;
use crate::protocol::ClientCommand;
use crate::session::{GameSession, PlayerId};

/// State of one open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    /// Player the connection acts for.
    pub player_id: PlayerId,
    /// Hub id of the connection.
    pub connection_id: ConnectionId,
}

/// Maps client commands onto lifecycle operations.
#[derive(Debug, Clone)]
pub struct EventChannel {
    lifecycle: SessionLifecycle,
    hub: ConnectionHub,
}

impl EventChannel {
    /// Creates a channel. `hub` must be the hub the lifecycle's events
    /// end up in.
    pub fn new(lifecycle: SessionLifecycle, hub: ConnectionHub) -> Self {
        Self { lifecycle, hub }
    }

    /// The lifecycle commands are dispatched to.
    pub fn lifecycle(&self) -> &SessionLifecycle {
        &self.lifecycle
    }

    /// The connection hub.
    pub fn hub(&self) -> &ConnectionHub {
        &self.hub
    }

    /// Opens a connection, minting a player id if none was given.
    #[instrument(skip(self))]
    pub async fn open(
        &self,
        player_id: Option<String>,
    ) -> (ConnectionContext, mpsc::Receiver<EventEnvelope>) {
        let player_id = player_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let (connection_id, rx) = self.hub.register(&player_id).await;
        let ctx = ConnectionContext {
            player_id: player_id.clone(),
            connection_id,
        };
        self.reply(&ctx, ServerEvent::Connected { player_id }).await;
        info!(player_id = %ctx.player_id, connection_id, "Connection opened");
        (ctx, rx)
    }

    /// Handles one inbound text frame.
    pub async fn handle_text(&self, ctx: &ConnectionContext, text: &str) {
        match serde_json::from_str::<ClientCommand>(text) {
            Ok(command) => self.handle(ctx, command).await,
            Err(e) => {
                let err = SessionError::validation(ValidationError::BadRequest(format!(
                    "Unreadable command: {}",
                    e
                )));
                self.fail(ctx, "unparsed", err).await;
            }
        }
    }

    /// Runs one command. Failures are reported to this connection only.
    #[instrument(skip(self, ctx), fields(player_id = %ctx.player_id, command = command.name()))]
    pub async fn handle(&self, ctx: &ConnectionContext, command: ClientCommand) {
        let player = ctx.player_id.clone();
        let name = command.name();
        let result: Result<GameSession, SessionError> = match command {
            ClientCommand::CreateGame => self.lifecycle.create(&player).await,
            ClientCommand::JoinGame { session_id, code } => {
                self.lifecycle
                    .join(&player, session_id.as_deref(), code.as_deref())
                    .await
            }
            ClientCommand::MakeMove {
                session_id,
                mv,
                expected_sequence,
            } => {
                self.lifecycle
                    .make_move(&player, &session_id, mv, expected_sequence)
                    .await
            }
            ClientCommand::EndTurn {
                session_id,
                expected_sequence,
            } => {
                self.lifecycle
                    .end_turn(&player, &session_id, expected_sequence)
                    .await
            }
            ClientCommand::Reconnect { session_id } => {
                self.lifecycle.reconnect(&player, &session_id).await
            }
            ClientCommand::GetState { session_id } => {
                self.lifecycle.snapshot(&player, &session_id).await
            }
        };

        match result {
            Ok(session) => {
                if session.seat_of(&player).is_some() {
                    self.hub.track_session(&player, &session.id).await;
                }
                debug!("Command applied");
            }
            Err(err) => self.fail(ctx, name, err).await,
        }
    }

    /// Closes a connection. Once the player's last connection is gone,
    /// every session the player is seated in sees a disconnect, whichever
    /// connection issued the commands for it.
    #[instrument(skip(self, ctx), fields(player_id = %ctx.player_id, connection_id = ctx.connection_id))]
    pub async fn close(&self, ctx: ConnectionContext) {
        let orphaned = self.hub.unregister(&ctx.player_id, ctx.connection_id).await;
        info!(still_connected = orphaned.is_none(), "Connection closed");
        let Some(sessions) = orphaned else {
            return;
        };
        for session_id in &sessions {
            if let Err(e) = self.lifecycle.disconnect(&ctx.player_id, session_id).await {
                warn!(session_id = %session_id, error = %e, "Disconnect handling failed");
            }
        }
    }

    async fn fail(&self, ctx: &ConnectionContext, command: &str, err: SessionError) {
        match &err.kind {
            SessionErrorKind::Validation(_) => {
                warn!(command, error = %err, "Command rejected");
            }
            SessionErrorKind::Concurrency(_) => debug!(command, error = %err, "Command hit a busy session"),
            SessionErrorKind::NotFound(_) | SessionErrorKind::Expired(_) => {
                info!(command, error = %err, "Command for unavailable session");
            }
            SessionErrorKind::Storage(_) | SessionErrorKind::Internal(_) => {
                error!(command, error = %err, "Command failed");
            }
        }
        self.reply(ctx, ServerEvent::from_error(&err)).await;
    }

    async fn reply(&self, ctx: &ConnectionContext, event: ServerEvent) {
        let delivered = self
            .hub
            .send_to_connection(&ctx.player_id, ctx.connection_id, EventEnvelope::new(event))
            .await;
        if !delivered {
            debug!(player_id = %ctx.player_id, "Reply not delivered");
        }
    }
}
