//! The conversation store: recipient-set matching and message ingestion.
//!
//! All mutations go through one [`watch::Sender`], whose modify closure
//! runs under the channel's write lock. The scan for an existing
//! conversation and the write that follows therefore see one consistent
//! snapshot, and concurrent ingestions for the same recipient set
//! serialize instead of producing two diverging copies.
//!
//! Every mutation publishes a new [`Snapshot`]. Conversations that were
//! not touched keep their `Arc`, so subscribers can cheaply tell which
//! ones changed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use setchat_proto::identity::{Identity, RecipientKey};
use tokio::sync::watch;

use crate::contacts::ContactDirectory;
use crate::conversation::{Conversation, FormattedConversation, Message};

/// Reasons a recipient list or message is rejected by the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The recipient list is empty.
    #[error("a conversation needs at least one recipient")]
    EmptyRecipients,

    /// A recipient or sender identity is the empty string.
    #[error("identities must not be empty")]
    EmptyIdentity,

    /// The only recipient is the local user.
    #[error("cannot start a conversation with only yourself ({0})")]
    SelfOnlyRecipients(Identity),
}

/// Immutable view of the store's conversations at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    conversations: Vec<Arc<Conversation>>,
    index: HashMap<RecipientKey, usize>,
}

impl Snapshot {
    /// Conversations in creation order.
    #[must_use]
    pub fn conversations(&self) -> &[Arc<Conversation>] {
        &self.conversations
    }

    /// Position of the conversation with this key, if any.
    #[must_use]
    pub fn position(&self, key: &RecipientKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Looks a conversation up by the recipients that identify it.
    #[must_use]
    pub fn find(&self, recipients: &[Identity]) -> Option<&Arc<Conversation>> {
        self.position(&RecipientKey::new(recipients))
            .and_then(|i| self.conversations.get(i))
    }

    /// Number of conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// Returns `true` if there are no conversations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Owned copies of all conversations, for persistence.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Conversation> {
        self.conversations.iter().map(|c| (**c).clone()).collect()
    }

    /// Appends an empty conversation. The key must not be present.
    fn push(&mut self, key: RecipientKey, conversation: Conversation) -> usize {
        let position = self.conversations.len();
        self.conversations.push(Arc::new(conversation));
        self.index.insert(key, position);
        position
    }

    /// Appends `message` to the conversation for `key`, creating it if
    /// needed. Returns the conversation's position.
    fn append(&mut self, key: RecipientKey, recipients: &[Identity], message: Message) -> usize {
        if let Some(position) = self.position(&key) {
            let updated = self.conversations[position].with_message(message);
            self.conversations[position] = Arc::new(updated);
            position
        } else {
            self.push(
                key,
                Conversation {
                    recipients: recipients.to_vec(),
                    messages: vec![message],
                },
            )
        }
    }
}

/// Owns the local user's conversations.
pub struct ConversationStore {
    local: RwLock<Identity>,
    state: watch::Sender<Arc<Snapshot>>,
    selected: AtomicUsize,
}

impl ConversationStore {
    /// Creates an empty store for `local`.
    #[must_use]
    pub fn new(local: Identity) -> Self {
        Self::from_conversations(local, Vec::new())
    }

    /// Creates a store from previously persisted conversations.
    ///
    /// Persisted lists written by older clients may hold two conversations
    /// with the same recipients. Their messages are merged into the first
    /// one so the one-conversation-per-key rule holds.
    #[must_use]
    pub fn from_conversations(local: Identity, conversations: Vec<Conversation>) -> Self {
        let mut snapshot = Snapshot::default();
        for conversation in conversations {
            let key = conversation.key();
            if let Some(position) = snapshot.position(&key) {
                tracing::warn!(recipients = %key, "merging duplicate persisted conversation");
                let mut merged = (*snapshot.conversations[position]).clone();
                merged.messages.extend(conversation.messages);
                snapshot.conversations[position] = Arc::new(merged);
            } else {
                snapshot.push(key, conversation);
            }
        }

        Self {
            local: RwLock::new(local),
            state: watch::Sender::new(Arc::new(snapshot)),
            selected: AtomicUsize::new(0),
        }
    }

    /// The identity messages are sent as.
    #[must_use]
    pub fn local_identity(&self) -> Identity {
        self.local.read().clone()
    }

    /// Changes the identity messages are sent as.
    pub fn set_local_identity(&self, identity: Identity) {
        *self.local.write() = identity;
    }

    /// Current snapshot of all conversations.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.state.borrow())
    }

    /// Subscribes to snapshot changes. The receiver starts at the current
    /// snapshot, marked as seen.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.state.subscribe()
    }

    /// Adds an empty conversation with `recipients`.
    ///
    /// If a conversation with the same recipient set already exists, no new
    /// one is added and the existing position is returned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the recipient list is malformed.
    pub fn create_conversation(&self, recipients: &[Identity]) -> Result<usize, StoreError> {
        self.validate(recipients)?;
        let key = RecipientKey::new(recipients);

        let mut position = 0;
        let created = self.state.send_if_modified(|current| {
            if let Some(existing) = current.position(&key) {
                position = existing;
                return false;
            }
            let mut next = (**current).clone();
            position = next.push(key.clone(), Conversation::new(recipients.to_vec()));
            *current = Arc::new(next);
            true
        });

        if created {
            tracing::debug!(recipients = %key, position, "conversation created");
        } else {
            tracing::debug!(recipients = %key, position, "conversation already exists");
        }
        Ok(position)
    }

    /// Files a message under the conversation matching `recipients`.
    ///
    /// The matching conversation is replaced by a copy with the message
    /// appended; if none matches, a new conversation holding only this
    /// message is added. Identical calls add identical messages twice.
    ///
    /// Returns the position of the conversation that received the message.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the recipient list or sender is malformed.
    pub fn ingest_message(
        &self,
        recipients: &[Identity],
        text: impl Into<String>,
        sender: Identity,
    ) -> Result<usize, StoreError> {
        self.validate(recipients)?;
        if sender.is_empty() {
            return Err(StoreError::EmptyIdentity);
        }
        let key = RecipientKey::new(recipients);
        let message = Message {
            sender,
            text: text.into(),
        };

        let mut position = 0;
        self.state.send_modify(|current| {
            let mut next = (**current).clone();
            position = next.append(key, recipients, message);
            *current = Arc::new(next);
        });
        Ok(position)
    }

    /// Sets the selected conversation. The index is not checked against
    /// the current list; reads treat an out-of-range index as "none".
    pub fn select_conversation_index(&self, index: usize) {
        self.selected.store(index, Ordering::Relaxed);
    }

    /// The raw selection index.
    #[must_use]
    pub fn selected_index(&self) -> usize {
        self.selected.load(Ordering::Relaxed)
    }

    /// All conversations formatted for display.
    pub fn conversations(
        &self,
        directory: &(impl ContactDirectory + ?Sized),
    ) -> Vec<FormattedConversation> {
        let snapshot = self.snapshot();
        let local = self.local_identity();
        let selected = self.selected_index();
        snapshot
            .conversations()
            .iter()
            .enumerate()
            .map(|(i, c)| FormattedConversation::build(c, directory, &local, i == selected))
            .collect()
    }

    /// The selected conversation formatted for display, if the selection
    /// index is in range.
    pub fn selected_conversation(
        &self,
        directory: &(impl ContactDirectory + ?Sized),
    ) -> Option<FormattedConversation> {
        let snapshot = self.snapshot();
        let conversation = snapshot.conversations().get(self.selected_index())?;
        Some(FormattedConversation::build(
            conversation,
            directory,
            &self.local_identity(),
            true,
        ))
    }

    fn validate(&self, recipients: &[Identity]) -> Result<(), StoreError> {
        if recipients.is_empty() {
            return Err(StoreError::EmptyRecipients);
        }
        if recipients.iter().any(Identity::is_empty) {
            return Err(StoreError::EmptyIdentity);
        }
        let local = self.local.read();
        if recipients.iter().all(|r| *r == *local) {
            return Err(StoreError::SelfOnlyRecipients(local.clone()));
        }
        Ok(())
    }
}
