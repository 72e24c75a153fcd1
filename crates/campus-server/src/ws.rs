//! WebSocket transport for the real-time channel.
//!
//! Each socket is split into a writer task, which drains the connection's
//! outbound queue and sends periodic pings, and a reader loop that feeds
//! text frames to the connection's session one at a time.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use campus_shared::constants::MAX_EVENT_SIZE;
use campus_shared::types::UserId;

use crate::api::AppState;
use crate::auth::Handshake;
use crate::error::ServerError;
use crate::rooms::Frame;

/// `GET /ws?user_id=N`: authenticate, then upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(handshake): Query<Handshake>,
    State(state): State<AppState>,
) -> Result<Response, ServerError> {
    let user_id = state.authenticator.authenticate(&handshake).await?;

    Ok(ws
        .max_message_size(MAX_EVENT_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, user_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: UserId) {
    let (session, rx) = state.realtime.connect(user_id).await;
    info!(conn = %session.id().short(), user = %user_id, "WebSocket connected");

    let (ws_tx, mut ws_rx) = socket.split();
    let mut writer = tokio::spawn(write_loop(ws_tx, rx, state.config.heartbeat_interval));

    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => session.handle_text(text.as_str()).await,
                Some(Ok(Message::Binary(data))) => {
                    debug!(conn = %session.id().short(), len = data.len(), "Ignoring binary frame");
                }
                // axum answers pings itself
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(conn = %session.id().short(), error = %e, "WebSocket read failed");
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    writer.abort();
    info!(conn = %session.id().short(), user = %user_id, "WebSocket disconnected");
    session.close().await;
}

async fn write_loop(
    mut ws_tx: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Frame>,
    heartbeat: Duration,
) {
    let mut ping = tokio::time::interval(heartbeat);
    ping.tick().await;

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                trace!("Sent ping");
            }
        }
    }
}
