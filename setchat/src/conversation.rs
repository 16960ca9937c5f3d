//! Conversation and message model, plus the formatted views built from it.
//!
//! A [`Conversation`] has no id. It is identified by [`Conversation::key`],
//! the normalized form of its recipient list.

use serde::{Deserialize, Serialize};
use setchat_proto::identity::{Identity, RecipientKey};

use crate::contacts::{ContactDirectory, display_name};

/// A text message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Identity that wrote the message.
    pub sender: Identity,
    /// Message body.
    pub text: String,
}

/// A conversation as seen by the local user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Everyone in the conversation except the local user, in the order
    /// first seen.
    pub recipients: Vec<Identity>,
    /// Messages in arrival order.
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Creates a conversation with no messages.
    #[must_use]
    pub const fn new(recipients: Vec<Identity>) -> Self {
        Self {
            recipients,
            messages: Vec::new(),
        }
    }

    /// The key that identifies this conversation.
    #[must_use]
    pub fn key(&self) -> RecipientKey {
        RecipientKey::new(&self.recipients)
    }

    /// Returns a copy of this conversation with `message` appended.
    #[must_use]
    pub fn with_message(&self, message: Message) -> Self {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        messages.extend(self.messages.iter().cloned());
        messages.push(message);
        Self {
            recipients: self.recipients.clone(),
            messages,
        }
    }
}

/// A recipient with its resolved display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedRecipient {
    /// The recipient's identity.
    pub id: Identity,
    /// Contact name, or the identity string if unknown.
    pub name: String,
}

/// A message decorated for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedMessage {
    /// Identity that wrote the message.
    pub sender: Identity,
    /// Contact name of the sender, or the identity string if unknown.
    pub sender_name: String,
    /// Message body.
    pub text: String,
    /// Whether the local user wrote it.
    pub from_me: bool,
}

/// A conversation decorated for display. Never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedConversation {
    /// Recipients with resolved names, in stored order.
    pub recipients: Vec<FormattedRecipient>,
    /// Messages with resolved sender names.
    pub messages: Vec<FormattedMessage>,
    /// Whether this is the selected conversation.
    pub selected: bool,
}

impl FormattedConversation {
    /// Builds the display form of `conversation`.
    pub fn build(
        conversation: &Conversation,
        directory: &(impl ContactDirectory + ?Sized),
        local: &Identity,
        selected: bool,
    ) -> Self {
        let recipients = conversation
            .recipients
            .iter()
            .map(|id| FormattedRecipient {
                id: id.clone(),
                name: display_name(directory, id),
            })
            .collect();
        let messages = conversation
            .messages
            .iter()
            .map(|m| FormattedMessage {
                sender: m.sender.clone(),
                sender_name: display_name(directory, &m.sender),
                text: m.text.clone(),
                from_me: &m.sender == local,
            })
            .collect();
        Self {
            recipients,
            messages,
            selected,
        }
    }

    /// Recipient names joined with `", "`.
    #[must_use]
    pub fn title(&self) -> String {
        self.recipients
            .iter()
            .map(|r| r.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
