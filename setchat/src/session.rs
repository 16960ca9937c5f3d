//! Wires the conversation store to the channel.
//!
//! Outbound messages are filed locally before they are transmitted, so a
//! send never waits on the network to show up in the conversation. Inbound
//! events are fed into the store by a background task.

use std::path::PathBuf;
use std::sync::Arc;

use setchat_proto::event::{ClientEvent, ServerEvent};
use setchat_proto::identity::Identity;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::channel::{ChannelAdapter, ChannelError};
use crate::contacts::ContactList;
use crate::state::LocalState;
use crate::store::{ConversationStore, StoreError};

/// A client session: one store, one channel.
pub struct Session {
    store: Arc<ConversationStore>,
    channel: Arc<ChannelAdapter>,
}

impl Session {
    /// Creates a session over an existing store and channel.
    #[must_use]
    pub const fn new(store: Arc<ConversationStore>, channel: Arc<ChannelAdapter>) -> Self {
        Self { store, channel }
    }

    /// The conversation store.
    #[must_use]
    pub const fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// The channel to the relay.
    #[must_use]
    pub const fn channel(&self) -> &Arc<ChannelAdapter> {
        &self.channel
    }

    /// Sends `text` to `recipients` as the local identity.
    ///
    /// The message is added to the local conversation first and stays there
    /// whether or not transmission succeeds. Returns whether the frame was
    /// handed to the socket.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the recipient list is rejected. Nothing is
    /// transmitted in that case.
    pub async fn send_message(
        &self,
        recipients: Vec<Identity>,
        text: impl Into<String>,
    ) -> Result<bool, StoreError> {
        let text = text.into();
        let sender = self.store.local_identity();
        let position = self
            .store
            .ingest_message(&recipients, text.clone(), sender)?;

        let event = ClientEvent::SendMessage { recipients, text };
        let sent = self.channel.send(&event).await;
        if !sent {
            tracing::info!(position, "message kept locally, not transmitted");
        }
        Ok(sent)
    }

    /// Sends `text` to the selected conversation.
    ///
    /// Returns `Ok(None)` if nothing is selected.
    ///
    /// # Errors
    ///
    /// See [`send_message`](Self::send_message).
    pub async fn send_to_selected(
        &self,
        text: impl Into<String>,
    ) -> Result<Option<bool>, StoreError> {
        let snapshot = self.store.snapshot();
        let Some(conversation) = snapshot.conversations().get(self.store.selected_index()) else {
            return Ok(None);
        };
        let recipients = conversation.recipients.clone();
        self.send_message(recipients, text).await.map(Some)
    }

    /// Switches the local identity and reconnects the channel as it.
    ///
    /// The store's identity changes even if the connection fails.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the new connection cannot be opened.
    pub async fn switch_identity(&self, identity: Identity) -> Result<(), ChannelError> {
        tracing::info!(identity = %identity, "switching identity");
        self.store.set_local_identity(identity.clone());
        self.channel.set_identity(Some(identity)).await
    }

    /// Spawns the task that files inbound messages into the store.
    ///
    /// The task ends when the channel is shut down.
    pub fn spawn_inbound_dispatch(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let channel = Arc::clone(&self.channel);
        tokio::spawn(async move {
            while let Some(event) = channel.recv().await {
                dispatch(&store, event);
            }
            tracing::debug!("inbound dispatch finished");
        })
    }

    /// Current state in its persisted form.
    #[must_use]
    pub fn local_state(&self, contacts: &ContactList) -> LocalState {
        local_state(&self.store, contacts)
    }

    /// Spawns the task that saves local state to `path` whenever the
    /// conversations or the contacts change.
    ///
    /// The task ends when `contacts`' sender is dropped. Save failures are
    /// logged and retried on the next change.
    pub fn spawn_persistence(
        &self,
        path: PathBuf,
        mut contacts: watch::Receiver<ContactList>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let mut conversations = store.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = conversations.changed() => if changed.is_err() { break },
                    changed = contacts.changed() => if changed.is_err() { break },
                }
                conversations.mark_unchanged();
                let state = local_state(&store, &contacts.borrow_and_update());
                if let Err(e) = state.save(&path).await {
                    tracing::warn!(err = %e, "failed to save local state");
                }
            }
            tracing::debug!(path = %path.display(), "persistence finished");
        })
    }
}

fn local_state(store: &ConversationStore, contacts: &ContactList) -> LocalState {
    let id = store.local_identity();
    LocalState {
        id: (!id.is_empty()).then_some(id),
        conversations: store.snapshot().to_vec(),
        contacts: contacts.clone(),
    }
}

/// Applies one inbound event to the store. Returns the position of the
/// conversation that received a message, if any.
fn dispatch(store: &ConversationStore, event: ServerEvent) -> Option<usize> {
    match event {
        ServerEvent::ReceiveMessage {
            recipients,
            sender,
            text,
        } => match store.ingest_message(&recipients, text, sender.clone()) {
            Ok(position) => {
                tracing::debug!(sender = %sender, position, "message received");
                Some(position)
            }
            Err(e) => {
                tracing::warn!(sender = %sender, err = %e, "dropping inbound message");
                None
            }
        },
        ServerEvent::Error { reason } => {
            tracing::warn!(reason = %reason, "server error");
            None
        }
    }
}
