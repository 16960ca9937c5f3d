//! Per-recipient rewrite of an outgoing message.
//!
//! When A sends to `[B, C]`, B's view of that conversation is "C and A"
//! and C's view is "B and A". [`fan_out`] computes those views so that
//! each receiver files the message under the same conversation it would
//! have created itself.

use setchat_proto::event::ServerEvent;
use setchat_proto::identity::Identity;

/// One rewritten copy of a message, addressed to a single identity group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Identity group to broadcast to.
    pub target: Identity,
    /// Event carrying the target's corrected recipient list.
    pub event: ServerEvent,
}

/// Computes the corrected recipient list for `target`.
///
/// Every entry equal to `target` or `sender` is removed and `sender` is
/// appended once, preserving the original order of the rest.
#[must_use]
pub fn corrected_recipients(
    sender: &Identity,
    recipients: &[Identity],
    target: &Identity,
) -> Vec<Identity> {
    let mut corrected: Vec<Identity> = recipients
        .iter()
        .filter(|r| *r != target && *r != sender)
        .cloned()
        .collect();
    corrected.push(sender.clone());
    corrected
}

/// Rewrites one inbound message into a delivery per distinct recipient.
///
/// The sender never receives a copy, even if it listed itself. A
/// recipient listed twice is delivered to once.
#[must_use]
pub fn fan_out(sender: &Identity, recipients: &[Identity], text: &str) -> Vec<Delivery> {
    let mut deliveries: Vec<Delivery> = Vec::with_capacity(recipients.len());
    for target in recipients {
        if target == sender || deliveries.iter().any(|d| &d.target == target) {
            continue;
        }
        deliveries.push(Delivery {
            target: target.clone(),
            event: ServerEvent::ReceiveMessage {
                recipients: corrected_recipients(sender, recipients, target),
                sender: sender.clone(),
                text: text.to_string(),
            },
        });
    }
    deliveries
}
