//! Relay server core: shared state, WebSocket handler, and fan-out.
//!
//! Clients connect to `/ws?id=<identity>`. The relay joins each connection
//! to its identity's group, and for every `send-message` it receives it
//! broadcasts one rewritten copy per recipient (see [`crate::router`]).
//! Nothing is stored: a recipient with no live connections simply misses
//! the message.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use setchat_proto::codec;
use setchat_proto::event::{ClientEvent, ServerEvent};
use setchat_proto::identity::Identity;
use tokio::sync::mpsc;

use crate::groups::{ConnectionId, IdentityGroups, Outbound};
use crate::router;

/// Default maximum accepted frame size in bytes (64 KB).
const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Shared relay server state.
pub struct RelayState {
    /// Live connections grouped by identity.
    pub groups: IdentityGroups,
    /// Maximum accepted binary frame size in bytes.
    max_frame_size: usize,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates relay state with no connections and the default frame limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates relay state with a custom frame size limit.
    #[must_use]
    pub fn with_config(max_frame_size: usize) -> Self {
        Self {
            groups: IdentityGroups::new(),
            max_frame_size,
        }
    }

    /// Total number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.groups.connection_count().await
    }
}

/// Query parameters accepted on the WebSocket upgrade request.
#[derive(Debug, serde::Deserialize)]
pub struct ConnectParams {
    /// Identity of the connecting user.
    pub id: Option<String>,
}

/// Handles an upgraded WebSocket connection for one identity.
///
/// The connection lifecycle:
/// 1. Join the identity's group.
/// 2. Spawn a writer task draining this connection's outbound channel.
/// 3. Read frames and fan out each `send-message`.
/// 4. On disconnect, leave the group.
pub async fn handle_socket(socket: WebSocket, identity: Identity, state: Arc<RelayState>) {
    let conn = state.groups.next_connection_id();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // One ordered outbound stream per connection.
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let group_size = state.groups.join(&identity, conn, tx.clone()).await;
    tracing::info!(identity = %identity, conn = %conn, group_size, "connection joined");

    let writer_identity = identity.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(identity = %writer_identity, conn = %conn, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_identity = identity.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_binary_frame(&reader_identity, conn, &tx, &data, &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::info!(identity = %reader_identity, conn = %conn, "received close frame");
                    break;
                }
                _ => {
                    // Ignore text, ping, pong frames.
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

    state.groups.leave(&identity, conn).await;
    tracing::info!(identity = %identity, conn = %conn, "connection left");
}

/// Handles one binary frame from a connected client.
async fn handle_binary_frame(
    identity: &Identity,
    conn: ConnectionId,
    reply: &Outbound,
    data: &[u8],
    state: &RelayState,
) {
    if data.len() > state.max_frame_size {
        tracing::warn!(
            identity = %identity,
            size = data.len(),
            max = state.max_frame_size,
            "frame exceeds size limit"
        );
        let err = ServerEvent::Error {
            reason: format!(
                "frame too large: {} bytes (max {})",
                data.len(),
                state.max_frame_size
            ),
        };
        send_event(reply, &err);
        return;
    }

    let event = match codec::decode_client(data) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(identity = %identity, error = %e, "failed to decode frame, skipping");
            return;
        }
    };

    match event {
        ClientEvent::SendMessage { recipients, text } => {
            tracing::debug!(
                sender = %identity,
                recipients = recipients.len(),
                text_len = text.len(),
                "routing message"
            );
            broadcast(state, identity, conn, &recipients, &text).await;
        }
    }
}

/// Fans a message out to every recipient's identity group.
///
/// The originating connection is never written to. A target without live
/// connections is skipped without affecting the others.
async fn broadcast(
    state: &RelayState,
    sender: &Identity,
    origin: ConnectionId,
    recipients: &[Identity],
    text: &str,
) {
    for delivery in router::fan_out(sender, recipients, text) {
        let frame = match codec::encode_server(&delivery.event) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                tracing::error!(target_id = %delivery.target, error = %e, "failed to encode delivery");
                continue;
            }
        };

        let members = state.groups.members(&delivery.target).await;
        if members.is_empty() {
            tracing::debug!(target_id = %delivery.target, "no live connections, dropping");
            continue;
        }

        for (member, tx) in members {
            if member == origin {
                continue;
            }
            if tx.send(Message::Binary(frame.clone())).is_err() {
                tracing::warn!(
                    target_id = %delivery.target,
                    conn = %member,
                    "member channel closed, skipping"
                );
            }
        }
    }
}

/// Encodes and queues a server event on one connection's outbound stream.
fn send_event(tx: &Outbound, event: &ServerEvent) {
    match codec::encode_server(event) {
        Ok(bytes) => {
            let _ = tx.send(Message::Binary(bytes.into()));
        }
        Err(e) => tracing::error!(error = %e, "failed to encode server event"),
    }
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Starts the relay server in-process for testing on an OS-assigned port.
#[cfg(test)]
pub async fn start_test_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start_server("127.0.0.1:0")
        .await
        .expect("failed to start test server")
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
///
/// Requests without a non-empty `id` query parameter are rejected with
/// 400 and never upgraded.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<RelayState>>,
) -> Response {
    let Some(id) = params.id.filter(|id| !id.is_empty()) else {
        tracing::warn!("rejecting connection without identity");
        return (StatusCode::BAD_REQUEST, "missing id query parameter").into_response();
    };
    let identity = Identity::new(id);
    ws.on_upgrade(move |socket| handle_socket(socket, identity, state))
}
