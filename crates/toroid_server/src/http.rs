//! HTTP and WebSocket surface.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::channel::EventChannel;
use crate::error::{SessionError, SessionErrorKind};

/// Query string of the WebSocket endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectParams {
    /// Identity to act as. A fresh one is minted when absent.
    pub player_id: Option<String>,
}

/// Builds the router over `channel`.
pub fn router(channel: EventChannel) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(connect))
        .route("/sessions/{id}", get(session_snapshot))
        .route("/sessions/{id}/moves", get(session_moves))
        .with_state(channel)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[instrument(skip(channel, upgrade))]
async fn connect(
    State(channel): State<EventChannel>,
    Query(params): Query<ConnectParams>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| run_socket(channel, socket, params.player_id))
}

async fn run_socket(channel: EventChannel, socket: WebSocket, player_id: Option<String>) {
    let (mut outbound, mut inbound) = socket.split();
    let (ctx, mut rx) = channel.open(player_id).await;

    let writer = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let json = match serde_json::to_string(&envelope) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize envelope");
                    continue;
                }
            };
            if outbound.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = inbound.next().await {
        match frame {
            Ok(Message::Text(text)) => channel.handle_text(&ctx, text.as_str()).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Socket read failed");
                break;
            }
        }
    }

    channel.close(ctx).await;
    writer.abort();
}

#[instrument(skip(channel))]
async fn session_snapshot(
    State(channel): State<EventChannel>,
    Path(id): Path<String>,
) -> Response {
    match channel.lifecycle().current(&id).await {
        Ok(session) => Json(session).into_response(),
        Err(e) => error_response(&e),
    }
}

#[instrument(skip(channel))]
async fn session_moves(State(channel): State<EventChannel>, Path(id): Path<String>) -> Response {
    let records = channel.lifecycle().records();
    match records.find_session(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(&SessionError::not_found(id)),
        Err(e) => return error_response(&e.into()),
    }
    match records.moves_for_session(&id).await {
        Ok(moves) => Json(moves).into_response(),
        Err(e) => error_response(&e.into()),
    }
}

/// HTTP status for an error kind.
pub fn status_for(kind: &SessionErrorKind) -> StatusCode {
    match kind {
        SessionErrorKind::Validation(_) => StatusCode::BAD_REQUEST,
        SessionErrorKind::Concurrency(_) => StatusCode::CONFLICT,
        SessionErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
        SessionErrorKind::Expired(_) => StatusCode::GONE,
        SessionErrorKind::Storage(_) | SessionErrorKind::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(err: &SessionError) -> Response {
    let body = json!({ "code": err.kind.code(), "message": err.kind.public_message() });
    (status_for(&err.kind), Json(body)).into_response()
}
