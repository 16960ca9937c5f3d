// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::future_not_send
)]

//! Integration tests for relay fan-out over real WebSocket connections.
//!
//! Covers:
//! - one send to `[B, C]` produces a differently rewritten copy for each
//! - every live connection of a target identity receives the copy
//! - the originating connection never receives its own message
//! - a recipient with no live connections does not break the broadcast
//! - messages from one sender to one group keep their order

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use setchat_proto::codec;
use setchat_proto::event::{ClientEvent, ServerEvent};
use setchat_proto::identity::{Identity, identities};
use setchat_relay::relay::{RelayState, start_server_with_state};
use tokio_tungstenite::tungstenite;

type TestSocket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn start_relay() -> (std::net::SocketAddr, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (addr, state)
}

async fn connect_as(addr: std::net::SocketAddr, id: &str) -> TestSocket {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?id={id}"))
        .await
        .unwrap();
    ws
}

async fn wait_for_connections(state: &RelayState, n: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while state.connection_count().await < n {
        assert!(
            tokio::time::Instant::now() < deadline,
            "relay never saw {n} connections"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn send(ws: &mut TestSocket, recipients: &[&str], text: &str) {
    let event = ClientEvent::SendMessage {
        recipients: identities(recipients.iter().copied()),
        text: text.to_string(),
    };
    let bytes = codec::encode_client(&event).unwrap();
    ws.send(tungstenite::Message::Binary(bytes.into()))
        .await
        .unwrap();
}

async fn recv(ws: &mut TestSocket) -> ServerEvent {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("recv timed out")
        .unwrap()
        .unwrap();
    codec::decode_server(&msg.into_data()).unwrap()
}

async fn assert_silent(ws: &mut TestSocket) {
    let result = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(result.is_err(), "expected no frame, got {result:?}");
}

fn receive(recipients: &[&str], sender: &str, text: &str) -> ServerEvent {
    ServerEvent::ReceiveMessage {
        recipients: identities(recipients.iter().copied()),
        sender: Identity::new(sender),
        text: text.to_string(),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn group_message_is_rewritten_per_recipient() {
    let (addr, state) = start_relay().await;
    let mut a = connect_as(addr, "a").await;
    let mut b = connect_as(addr, "b").await;
    let mut c = connect_as(addr, "c").await;
    wait_for_connections(&state, 3).await;

    send(&mut a, &["b", "c"], "hello both").await;

    assert_eq!(recv(&mut b).await, receive(&["c", "a"], "a", "hello both"));
    assert_eq!(recv(&mut c).await, receive(&["b", "a"], "a", "hello both"));
    assert_silent(&mut a).await;
}

#[tokio::test]
async fn every_connection_of_a_target_receives_the_copy() {
    let (addr, state) = start_relay().await;
    let mut a = connect_as(addr, "a").await;
    let mut b_phone = connect_as(addr, "b").await;
    let mut b_laptop = connect_as(addr, "b").await;
    wait_for_connections(&state, 3).await;

    send(&mut a, &["b"], "ping").await;

    assert_eq!(recv(&mut b_phone).await, receive(&["a"], "a", "ping"));
    assert_eq!(recv(&mut b_laptop).await, receive(&["a"], "a", "ping"));
}

#[tokio::test]
async fn self_addressed_message_does_not_echo() {
    let (addr, state) = start_relay().await;
    let mut a = connect_as(addr, "a").await;
    let mut a_other = connect_as(addr, "a").await;
    let mut b = connect_as(addr, "b").await;
    wait_for_connections(&state, 3).await;

    send(&mut a, &["a", "b"], "oops").await;

    assert_eq!(recv(&mut b).await, receive(&["a"], "a", "oops"));
    assert_silent(&mut a).await;
    assert_silent(&mut a_other).await;
}

#[tokio::test]
async fn offline_recipient_does_not_block_the_rest() {
    let (addr, state) = start_relay().await;
    let mut a = connect_as(addr, "a").await;
    let mut c = connect_as(addr, "c").await;
    wait_for_connections(&state, 2).await;

    // "b" has no live connections.
    send(&mut a, &["b", "c"], "anyone?").await;

    assert_eq!(recv(&mut c).await, receive(&["b", "a"], "a", "anyone?"));
}

#[tokio::test]
async fn messages_to_one_group_keep_send_order() {
    let (addr, state) = start_relay().await;
    let mut a = connect_as(addr, "a").await;
    let mut b = connect_as(addr, "b").await;
    wait_for_connections(&state, 2).await;

    for i in 0..20 {
        send(&mut a, &["b"], &format!("msg {i}")).await;
    }

    for i in 0..20 {
        match recv(&mut b).await {
            ServerEvent::ReceiveMessage { text, .. } => {
                assert_eq!(text, format!("msg {i}"), "order violated at {i}");
            }
            other => panic!("expected ReceiveMessage, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn replies_land_in_the_same_logical_conversation() {
    let (addr, state) = start_relay().await;
    let mut a = connect_as(addr, "a").await;
    let mut b = connect_as(addr, "b").await;
    let mut c = connect_as(addr, "c").await;
    wait_for_connections(&state, 3).await;

    send(&mut a, &["b", "c"], "first").await;
    let ServerEvent::ReceiveMessage { recipients, .. } = recv(&mut b).await else {
        panic!("expected ReceiveMessage");
    };
    let _ = recv(&mut c).await;

    // B replies to exactly the recipient list it was given.
    let reply_to: Vec<&str> = recipients.iter().map(Identity::as_str).collect();
    send(&mut b, &reply_to, "reply").await;

    assert_eq!(recv(&mut a).await, receive(&["c", "b"], "b", "reply"));
    assert_eq!(recv(&mut c).await, receive(&["a", "b"], "b", "reply"));
}
