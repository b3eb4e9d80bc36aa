//! WebSocket upgrade handler and per-connection event loop.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use relay_common::envelope::{CLOSE_BLOCKED, CLOSE_UNAUTHORIZED, HEARTBEAT_INTERVAL_MS};
use relay_common::{ClientEnvelope, ServerEnvelope};
use tokio::sync::mpsc;
use tokio::time;

use crate::error::RelayError;
use crate::models::block::BlockStatus;
use crate::models::identity::PublicIdentity;
use crate::AppState;

use super::registry::OutboundFrame;
use super::service::CLOSE_GRACE;

/// Close codes (4000-range for application-level).
const CLOSE_UNKNOWN_ERROR: u16 = 4000;
const CLOSE_SESSION_TIMEOUT: u16 = 4009;

/// Timeout for receiving `init` after connection (seconds).
const INIT_TIMEOUT_SECS: u64 = 10;

/// Largest accepted visitor message, in bytes.
const MAX_MESSAGE_SIZE: usize = 1000;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

/// The session is resolved before the upgrade completes; a connection is
/// anonymous for its whole lifetime unless the browser reconnects with a
/// fresh cookie.
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    jar: CookieJar,
) -> impl IntoResponse {
    let identity = match jar.get("sessionId") {
        Some(cookie) => match state.gateway.check_session(cookie.value()).await {
            Ok(identity) => identity,
            Err(err) => {
                tracing::warn!(%err, "session check failed during upgrade");
                None
            }
        },
        None => None,
    };
    ws.on_upgrade(move |socket| handle_connection(socket, state, identity))
}

async fn handle_connection(socket: WebSocket, state: AppState, identity: Option<PublicIdentity>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Step 1: wait for `init` within the timeout.
    let client_id = match wait_for_init(&mut ws_tx, &mut ws_rx).await {
        Some(client_id) => client_id,
        None => return,
    };

    // Step 2: a subject blocked at connect time is told and disconnected
    // before any registration happens.
    if let Some(identity) = &identity {
        match state.blocks.check(&identity.id).await {
            Ok(BlockStatus::Blocked { until, reason, .. }) => {
                let _ = send_envelope(&mut ws_tx, &ServerEnvelope::error(block_notice(until, &reason))).await;
                time::sleep(CLOSE_GRACE).await;
                let _ = send_close(&mut ws_tx, CLOSE_BLOCKED, "blocked").await;
                return;
            }
            Ok(BlockStatus::NotBlocked) => {}
            Err(err) => {
                tracing::error!(%err, "block check failed during connect");
                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "internal error").await;
                return;
            }
        }
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();
    state
        .relay
        .registry
        .register(&client_id, tx, identity.clone());

    tracing::info!(
        %client_id,
        authenticated = identity.is_some(),
        "visitor connection established"
    );

    // Heartbeat deadline: client must heartbeat within 1.5x the interval.
    let heartbeat_deadline = Duration::from_millis(HEARTBEAT_INTERVAL_MS * 3 / 2);
    let mut heartbeat_timer = time::interval(heartbeat_deadline);
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.
    let mut got_heartbeat = true;

    loop {
        tokio::select! {
            // Client sends us a message.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let envelope: ClientEnvelope = match serde_json::from_str(&text) {
                            Ok(envelope) => envelope,
                            Err(_) => {
                                let _ = send_envelope(&mut ws_tx, &ServerEnvelope::error("Invalid message format")).await;
                                continue;
                            }
                        };

                        match envelope {
                            ClientEnvelope::Heartbeat => {
                                got_heartbeat = true;
                            }
                            ClientEnvelope::Init { .. } => {
                                // Already bound; repeated init is ignored.
                            }
                            ClientEnvelope::Message { message } | ClientEnvelope::ChatMessage { message } => {
                                if message.len() > MAX_MESSAGE_SIZE {
                                    let _ = send_envelope(&mut ws_tx, &ServerEnvelope::error("Message too long (max 1000 characters)")).await;
                                    continue;
                                }
                                match state.relay.on_visitor_message(&client_id, &message).await {
                                    Ok(()) => {}
                                    Err(RelayError::Unauthenticated) => {
                                        let _ = send_envelope(&mut ws_tx, &ServerEnvelope::error("Please sign in to send messages")).await;
                                        let _ = send_close(&mut ws_tx, CLOSE_UNAUTHORIZED, "unauthorized").await;
                                        break;
                                    }
                                    Err(RelayError::Blocked { until, reason, .. }) => {
                                        let _ = send_envelope(&mut ws_tx, &ServerEnvelope::error(block_notice(until, &reason))).await;
                                        time::sleep(CLOSE_GRACE).await;
                                        let _ = send_close(&mut ws_tx, CLOSE_BLOCKED, "blocked").await;
                                        break;
                                    }
                                    Err(RelayError::RateLimited) => {
                                        let _ = send_envelope(&mut ws_tx, &ServerEnvelope::error("You are sending messages too quickly")).await;
                                    }
                                    Err(err) => {
                                        tracing::error!(%client_id, %err, "failed to relay visitor message");
                                        let _ = send_envelope(&mut ws_tx, &ServerEnvelope::error("Failed to deliver your message")).await;
                                    }
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, %client_id, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            // Frame queued by the relay (support replies, notices, closes).
            frame = rx.recv() => {
                match frame {
                    Some(OutboundFrame::Envelope(envelope)) => {
                        if send_envelope(&mut ws_tx, &envelope).await.is_err() {
                            break;
                        }
                    }
                    Some(OutboundFrame::Close { code, delay }) => {
                        if let Some(delay) = delay {
                            time::sleep(delay).await;
                        }
                        let _ = send_close(&mut ws_tx, code, "closed").await;
                        break;
                    }
                    None => break,
                }
            }

            // Heartbeat timeout check.
            _ = heartbeat_timer.tick() => {
                if !got_heartbeat {
                    tracing::debug!(%client_id, "heartbeat timeout, closing connection");
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "heartbeat timeout").await;
                    break;
                }
                got_heartbeat = false;
            }
        }
    }

    state.relay.on_connection_closed(&client_id);
    tracing::info!(%client_id, "visitor connection ended");
}

/// Wait for the `init` envelope, closing the socket on timeout or anything
/// unexpected.
async fn wait_for_init(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    ws_rx: &mut SplitStream<WebSocket>,
) -> Option<String> {
    let result = time::timeout(Duration::from_secs(INIT_TIMEOUT_SECS), async {
        while let Some(msg) = ws_rx.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!(?e, "ws read error during init");
                    return Err("read error");
                }
            };

            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => return Err("client closed"),
                Message::Ping(_) | Message::Pong(_) => continue,
                _ => continue,
            };

            return match serde_json::from_str::<ClientEnvelope>(&text) {
                Ok(ClientEnvelope::Init { client_id }) if !client_id.is_empty() => Ok(client_id),
                Ok(_) => Err("expected init"),
                Err(_) => Err("invalid json"),
            };
        }
        Err("connection closed before init")
    })
    .await;

    match result {
        Ok(Ok(client_id)) => Some(client_id),
        Ok(Err(reason)) => {
            tracing::debug!(%reason, "init handshake failed");
            let _ = send_close(ws_tx, CLOSE_UNKNOWN_ERROR, reason).await;
            None
        }
        Err(_timeout) => {
            let _ = send_close(ws_tx, CLOSE_SESSION_TIMEOUT, "init timeout").await;
            None
        }
    }
}

fn block_notice(until: Option<chrono::DateTime<Utc>>, reason: &str) -> String {
    match until {
        Some(until) => {
            let minutes = (until - Utc::now()).num_minutes().max(1);
            format!("You are blocked from support for another {minutes} minute(s). Reason: {reason}")
        }
        None => format!("You are permanently blocked from support. Reason: {reason}"),
    }
}

async fn send_envelope(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    envelope: &ServerEnvelope,
) -> Result<(), axum::Error> {
    match serde_json::to_string(envelope) {
        Ok(json) => ws_tx.send(Message::Text(json.into())).await,
        Err(err) => {
            tracing::error!(%err, "failed to serialize server envelope");
            Ok(())
        }
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(axum::extract::ws::CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
