//! Events exchanged over a client's WebSocket connection.
//!
//! The sender of a [`ClientEvent::SendMessage`] is never part of the
//! payload. The relay takes it from the identity the connection was
//! opened with.

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// Events a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientEvent {
    /// Deliver `text` to every identity in `recipients`.
    SendMessage {
        /// The other participants, from the sender's point of view.
        recipients: Vec<Identity>,
        /// Message body.
        text: String,
    },
}

impl ClientEvent {
    /// Stable event name, used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "send-message",
        }
    }
}

/// Events the relay pushes to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// A message rewritten for the receiving identity.
    ReceiveMessage {
        /// The other participants, from the receiver's point of view:
        /// the original recipients minus the receiver, plus the sender.
        recipients: Vec<Identity>,
        /// Identity of the connection that sent the message.
        sender: Identity,
        /// Message body.
        text: String,
    },

    /// The relay rejected a frame from this connection.
    Error {
        /// Human-readable reason.
        reason: String,
    },
}

impl ServerEvent {
    /// Stable event name, used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ReceiveMessage { .. } => "receive-message",
            Self::Error { .. } => "error",
        }
    }
}
