//! Collaboration hub: the WebSocket side of the server.
//!
//! Each connection gets an outbound queue registered with the
//! [`GroupRegistry`](crate::groups::GroupRegistry). A writer task drains the
//! queue onto the socket and sends heartbeat pings; the reader handles
//! `JoinGroup`/`LeaveGroup` requests. When either side ends, the connection
//! is unregistered, which removes it from every group it joined.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use taskhub_proto::codec;
use taskhub_proto::hub::{ClientFrame, ServerFrame};
use taskhub_proto::share::ShareToken;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};

use crate::api::AppState;
use crate::config::{JoinPolicy, clamp_heartbeat};
use crate::groups::{ConnectionId, GroupId, Outbound};
use crate::identity::ConnectionIdentity;
use crate::store::TaskStore;

/// Heartbeat intervals a connection may stay silent before it is closed.
const MISSED_HEARTBEATS: u32 = 2;

/// axum handler that upgrades `GET /hub/collaboration` to a hub connection.
pub async fn ws_handler<S: TaskStore>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let identity = ConnectionIdentity::from_headers(&headers);
    ws.max_message_size(state.config.max_frame_size)
        .on_upgrade(move |socket| handle_socket(socket, state, identity))
}

/// Runs one hub connection until the socket closes or goes silent.
pub async fn handle_socket<S: TaskStore>(
    socket: WebSocket,
    state: Arc<AppState<S>>,
    identity: ConnectionIdentity,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let registry = Arc::clone(state.dispatcher.registry());
    let conn = registry.register(tx);
    tracing::info!(conn = %conn, tenant = ?identity.tenant_id, "hub connection opened");

    let last_seen = Arc::new(Mutex::new(Instant::now()));
    let heartbeat = state.config.heartbeat();

    // Writer: outbound frames plus heartbeat pings.
    let writer_seen = Arc::clone(&last_seen);
    let mut write_task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_sender.send(Message::Text(frame.as_ref().into())).await.is_err() {
                        tracing::debug!(conn = %conn, "hub write failed");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let silent = writer_seen.lock().elapsed();
                    if silent > heartbeat.saturating_mul(MISSED_HEARTBEATS) {
                        tracing::info!(
                            conn = %conn,
                            silent_ms = silent.as_millis(),
                            "heartbeat missed, closing"
                        );
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                    if ws_sender.send(Message::Ping(axum::body::Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Reader: join/leave requests. Any inbound frame counts as liveness.
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            *last_seen.lock() = Instant::now();
            match msg {
                Message::Text(text) => {
                    handle_text(&reader_state, conn, &identity, text.as_str()).await;
                }
                Message::Close(_) => {
                    tracing::debug!(conn = %conn, "received close frame");
                    break;
                }
                _ => {
                    // Pongs only refresh liveness.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    let groups = registry.unregister(conn).unwrap_or(0);
    tracing::info!(conn = %conn, groups, "hub connection closed");
}

/// Handles one text frame from a client.
async fn handle_text<S: TaskStore>(
    state: &AppState<S>,
    conn: ConnectionId,
    identity: &ConnectionIdentity,
    text: &str,
) {
    let registry = state.dispatcher.registry();
    let reply = match codec::decode_client(text, state.config.max_frame_size) {
        Ok(ClientFrame::JoinGroup { group }) => {
            let group = GroupId::new(group);
            match authorize_join(state, identity, &group).await {
                Ok(()) => match registry.join(conn, &group) {
                    Ok(_) => ServerFrame::Joined {
                        group: group.as_str().to_string(),
                    },
                    Err(e) => ServerFrame::Error {
                        reason: e.to_string(),
                    },
                },
                Err(reason) => {
                    tracing::warn!(conn = %conn, group = %group, reason, "join rejected");
                    ServerFrame::Error {
                        reason: reason.to_string(),
                    }
                }
            }
        }
        Ok(ClientFrame::LeaveGroup { group }) => {
            let group = GroupId::new(group);
            registry.leave(conn, &group);
            ServerFrame::Left {
                group: group.as_str().to_string(),
            }
        }
        Err(e) => {
            tracing::warn!(conn = %conn, error = %e, "bad hub frame");
            ServerFrame::Error {
                reason: format!("invalid frame: {e}"),
            }
        }
    };
    match codec::encode_server(&reply) {
        Ok(encoded) => {
            registry.send_to(conn, Arc::from(encoded));
        }
        Err(e) => tracing::warn!(conn = %conn, error = %e, "failed to encode reply"),
    }
}

/// Applies the configured join policy.
async fn authorize_join<S: TaskStore>(
    state: &AppState<S>,
    identity: &ConnectionIdentity,
    group: &GroupId,
) -> Result<(), &'static str> {
    if group.as_str().trim().is_empty() {
        return Err("group name must not be empty");
    }
    match state.config.join_policy {
        JoinPolicy::Open => Ok(()),
        JoinPolicy::Scoped => {
            let own_tenant = identity
                .tenant_id
                .as_ref()
                .is_some_and(|t| t.as_str() == group.as_str());
            let own_user = identity
                .user_id
                .as_ref()
                .is_some_and(|u| u.as_str() == group.as_str());
            if own_tenant || own_user {
                return Ok(());
            }
            let token = ShareToken::new(group.as_str());
            if state.shares.is_live(&token).await {
                Ok(())
            } else {
                Err("not permitted to join this group")
            }
        }
    }
}

/// Sweeps connections whose queues have closed, once per heartbeat.
pub async fn prune_loop<S: TaskStore>(state: Arc<AppState<S>>, every: Duration) {
    let every = clamp_heartbeat(every);
    let mut ticker = interval_at(Instant::now() + every, every);
    loop {
        ticker.tick().await;
        state.dispatcher.registry().prune_closed();
    }
}
