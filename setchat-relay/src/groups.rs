//! Identity-scoped connection groups.
//!
//! Every connection joins the group named by the identity it connected
//! with. Broadcasting to an identity reaches all of that user's live
//! connections. Groups are ephemeral and lost on relay restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message;
use setchat_proto::identity::Identity;
use tokio::sync::{RwLock, mpsc};

/// Process-unique identifier for one accepted WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Sender half of a connection's ordered outbound stream.
pub type Outbound = mpsc::UnboundedSender<Message>;

/// Map from identity to the live connections in its group.
///
/// Thread-safe via [`RwLock`].
pub struct IdentityGroups {
    groups: RwLock<HashMap<Identity, HashMap<ConnectionId, Outbound>>>,
    next_id: AtomicU64,
}

impl Default for IdentityGroups {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityGroups {
    /// Creates an empty group map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocates an identifier for a newly accepted connection.
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Adds a connection to `identity`'s group.
    ///
    /// Returns the group size after joining.
    pub async fn join(&self, identity: &Identity, conn: ConnectionId, outbound: Outbound) -> usize {
        let mut groups = self.groups.write().await;
        let group = groups.entry(identity.clone()).or_default();
        group.insert(conn, outbound);
        group.len()
    }

    /// Removes a connection from `identity`'s group.
    ///
    /// Returns `true` if the connection was a member. The group itself is
    /// dropped once its last connection leaves.
    pub async fn leave(&self, identity: &Identity, conn: ConnectionId) -> bool {
        let mut groups = self.groups.write().await;
        let Some(group) = groups.get_mut(identity) else {
            return false;
        };
        let removed = group.remove(&conn).is_some();
        if group.is_empty() {
            groups.remove(identity);
        }
        removed
    }

    /// Snapshot of the connections in `identity`'s group at call time.
    pub async fn members(&self, identity: &Identity) -> Vec<(ConnectionId, Outbound)> {
        let groups = self.groups.read().await;
        groups
            .get(identity)
            .map(|group| group.iter().map(|(id, tx)| (*id, tx.clone())).collect())
            .unwrap_or_default()
    }

    /// Number of live connections in `identity`'s group.
    pub async fn group_size(&self, identity: &Identity) -> usize {
        let groups = self.groups.read().await;
        groups.get(identity).map_or(0, HashMap::len)
    }

    /// Total number of live connections across all groups.
    pub async fn connection_count(&self) -> usize {
        let groups = self.groups.read().await;
        groups.values().map(HashMap::len).sum()
    }
}
