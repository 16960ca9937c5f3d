// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::future_not_send
)]

//! End-to-end conversation flow: client sessions talking through an
//! in-process relay.
//!
//! Covers:
//! - a group message and its reply share one conversation on every side
//! - formatted views resolve contact names and the from-me flag
//! - every device of a recipient files the message
//! - sending while offline keeps the message locally

use std::sync::Arc;
use std::time::Duration;

use setchat::channel::ChannelAdapter;
use setchat::contacts::ContactList;
use setchat::session::Session;
use setchat::store::ConversationStore;
use setchat_proto::identity::{Identity, identities};
use setchat_relay::relay::{RelayState, start_server_with_state};
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Client {
    session: Session,
    _dispatch: JoinHandle<()>,
}

async fn start_relay() -> (String, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (format!("ws://{addr}/ws"), state)
}

async fn client(url: &str, id: &str) -> Client {
    let store = Arc::new(ConversationStore::new(Identity::new(id)));
    let channel = Arc::new(ChannelAdapter::new(url).unwrap());
    channel.set_identity(Some(Identity::new(id))).await.unwrap();
    let session = Session::new(store, channel);
    let dispatch = session.spawn_inbound_dispatch();
    Client {
        session,
        _dispatch: dispatch,
    }
}

async fn wait_for_connections(state: &RelayState, n: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while state.connection_count().await != n {
        assert!(
            tokio::time::Instant::now() < deadline,
            "relay never saw {n} connections"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn message_count(client: &Client) -> usize {
    client
        .session
        .store()
        .snapshot()
        .conversations()
        .iter()
        .map(|c| c.messages.len())
        .sum()
}

/// Waits until the client's store holds `n` messages in total.
async fn wait_for_messages(client: &Client, n: usize) {
    let mut rx = client.session.store().subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        while message_count(client) < n {
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("messages never arrived");
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn group_reply_stays_in_one_conversation_everywhere() {
    let (url, state) = start_relay().await;
    let a = client(&url, "a").await;
    let b = client(&url, "b").await;
    let c = client(&url, "c").await;
    wait_for_connections(&state, 3).await;

    assert!(
        a.session
            .send_message(identities(["b", "c"]), "hello both")
            .await
            .unwrap()
    );
    wait_for_messages(&b, 1).await;
    wait_for_messages(&c, 1).await;

    // B replies to exactly the recipients it sees.
    let reply_to = b.session.store().snapshot().conversations()[0]
        .recipients
        .clone();
    assert_eq!(reply_to, identities(["c", "a"]));
    assert!(b.session.send_message(reply_to, "reply").await.unwrap());

    wait_for_messages(&a, 2).await;
    wait_for_messages(&c, 2).await;

    for client in [&a, &b, &c] {
        let snapshot = client.session.store().snapshot();
        assert_eq!(snapshot.len(), 1, "one conversation per side");
        let texts: Vec<_> = snapshot.conversations()[0]
            .messages
            .iter()
            .map(|m| m.text.as_str())
            .collect();
        assert_eq!(texts, vec!["hello both", "reply"]);
    }
}

#[tokio::test]
async fn formatted_view_resolves_names() {
    let (url, state) = start_relay().await;
    let a = client(&url, "a").await;
    let b = client(&url, "b").await;
    wait_for_connections(&state, 2).await;

    a.session
        .send_message(identities(["b"]), "hi")
        .await
        .unwrap();
    wait_for_messages(&b, 1).await;

    let mut contacts = ContactList::new();
    contacts.add(Identity::new("a"), "Alice");
    let view = b.session.store().selected_conversation(&contacts).unwrap();

    assert_eq!(view.title(), "Alice");
    assert_eq!(view.messages[0].sender_name, "Alice");
    assert!(!view.messages[0].from_me);

    let mine = a
        .session
        .store()
        .selected_conversation(&ContactList::new())
        .unwrap();
    assert_eq!(mine.title(), "b");
    assert_eq!(mine.messages[0].sender_name, "a");
    assert!(mine.messages[0].from_me);
}

#[tokio::test]
async fn every_device_of_a_recipient_files_the_message() {
    let (url, state) = start_relay().await;
    let a = client(&url, "a").await;
    let phone = client(&url, "b").await;
    let laptop = client(&url, "b").await;
    wait_for_connections(&state, 3).await;

    a.session
        .send_message(identities(["b"]), "ping")
        .await
        .unwrap();

    wait_for_messages(&phone, 1).await;
    wait_for_messages(&laptop, 1).await;
    assert_eq!(
        laptop.session.store().snapshot().conversations()[0].recipients,
        identities(["a"])
    );
}

#[tokio::test]
async fn offline_send_is_kept_locally() {
    let (url, state) = start_relay().await;
    let a = client(&url, "a").await;
    wait_for_connections(&state, 1).await;

    a.session.channel().close().await;
    wait_for_connections(&state, 0).await;

    let sent = a
        .session
        .send_message(identities(["b"]), "later")
        .await
        .unwrap();
    assert!(!sent);
    assert_eq!(
        a.session.store().snapshot().conversations()[0].messages[0].text,
        "later"
    );
}

#[tokio::test]
async fn permuted_recipients_from_different_senders_merge() {
    let (url, state) = start_relay().await;
    let a = client(&url, "a").await;
    let b = client(&url, "b").await;
    let c = client(&url, "c").await;
    wait_for_connections(&state, 3).await;

    // A sees [b, c]; C independently addresses the same group as [b, a].
    a.session
        .send_message(identities(["b", "c"]), "from a")
        .await
        .unwrap();
    wait_for_messages(&c, 1).await;
    c.session
        .send_message(identities(["b", "a"]), "from c")
        .await
        .unwrap();

    wait_for_messages(&a, 2).await;
    wait_for_messages(&b, 2).await;
    assert_eq!(a.session.store().snapshot().len(), 1);
    assert_eq!(b.session.store().snapshot().len(), 1);
}
