// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::future_not_send
)]

//! Identity switching on a live session.
//!
//! Covers:
//! - the old connection leaves the relay before the new one is used
//! - events addressed to the old identity are never filed
//! - messages sent after the switch carry the new identity

use std::sync::Arc;
use std::time::Duration;

use setchat::channel::ChannelAdapter;
use setchat::session::Session;
use setchat::store::ConversationStore;
use setchat_proto::identity::{Identity, identities};
use setchat_relay::relay::{RelayState, start_server_with_state};

async fn start_relay() -> (String, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (format!("ws://{addr}/ws"), state)
}

async fn session_as(url: &str, id: &str) -> Session {
    let store = Arc::new(ConversationStore::new(Identity::new(id)));
    let channel = Arc::new(ChannelAdapter::new(url).unwrap());
    channel.set_identity(Some(Identity::new(id))).await.unwrap();
    Session::new(store, channel)
}

async fn wait_for_group(state: &RelayState, id: &str, n: usize) {
    let identity = Identity::new(id);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while state.groups.group_size(&identity).await != n {
        assert!(
            tokio::time::Instant::now() < deadline,
            "group {id} never reached {n} connections"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn switch_moves_the_connection_between_groups() {
    let (url, state) = start_relay().await;
    let session = session_as(&url, "x").await;
    wait_for_group(&state, "x", 1).await;

    session.switch_identity(Identity::new("y")).await.unwrap();

    wait_for_group(&state, "x", 0).await;
    wait_for_group(&state, "y", 1).await;
    assert_eq!(session.channel().identity(), Some(Identity::new("y")));
    assert_eq!(session.store().local_identity(), Identity::new("y"));
}

#[tokio::test]
async fn events_for_the_old_identity_are_not_filed() {
    let (url, state) = start_relay().await;
    let sender = session_as(&url, "s").await;
    let switcher = session_as(&url, "x").await;
    wait_for_group(&state, "x", 1).await;
    wait_for_group(&state, "s", 1).await;

    // Addressed to "x" while no dispatch task is draining the queue.
    sender
        .send_message(identities(["x"]), "for x")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    switcher.switch_identity(Identity::new("y")).await.unwrap();
    wait_for_group(&state, "y", 1).await;
    let _dispatch = switcher.spawn_inbound_dispatch();

    sender
        .send_message(identities(["y"]), "for y")
        .await
        .unwrap();

    let mut rx = switcher.store().subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        while switcher.store().snapshot().is_empty() {
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("message for y never arrived");

    let snapshot = switcher.store().snapshot();
    let texts: Vec<_> = snapshot
        .conversations()
        .iter()
        .flat_map(|c| c.messages.iter().map(|m| m.text.clone()))
        .collect();
    assert_eq!(texts, vec!["for y".to_string()]);
}

#[tokio::test]
async fn messages_after_switch_use_the_new_identity() {
    let (url, state) = start_relay().await;
    let bob = session_as(&url, "bob").await;
    let switcher = session_as(&url, "x").await;
    wait_for_group(&state, "bob", 1).await;

    switcher.switch_identity(Identity::new("y")).await.unwrap();
    wait_for_group(&state, "y", 1).await;
    let _dispatch = bob.spawn_inbound_dispatch();

    assert!(
        switcher
            .send_message(identities(["bob"]), "hello")
            .await
            .unwrap()
    );

    let mut rx = bob.store().subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        while bob.store().snapshot().is_empty() {
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("message never arrived");

    let snapshot = bob.store().snapshot();
    let conversation = &snapshot.conversations()[0];
    assert_eq!(conversation.recipients, identities(["y"]));
    assert_eq!(conversation.messages[0].sender, Identity::new("y"));

    let local = switcher.store().snapshot();
    assert_eq!(local.conversations()[0].messages[0].sender, Identity::new("y"));
}
