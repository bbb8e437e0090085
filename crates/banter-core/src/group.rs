//! Group abstraction for Banter.
//!
//! A group is a named set of live connections that receive the same published
//! frames. Group names live in three namespaces: chat rooms, private pairs,
//! and per-user notification feeds. The constructors here are the only way
//! names are built, so every session computes the same name for the same
//! conversation.

use std::collections::HashMap;

use banter_protocol::ServerFrame;
use tokio::sync::mpsc;
use tracing::debug;

/// Maximum group name length.
pub const MAX_GROUP_NAME_LENGTH: usize = 256;

/// A group identifier.
pub type GroupId = String;

/// A process-unique token identifying one live connection.
pub type ConnectionId = String;

/// The sending half of a connection's outbound queue.
///
/// Frames enqueued here are drained into the WebSocket by the owning session,
/// in order. An unbounded channel keeps fan-out non-blocking; a dropped
/// receiver (closed connection) surfaces as a send error at the broker.
pub type Mailbox = mpsc::UnboundedSender<ServerFrame>;

/// Build the group name for a chat room.
#[must_use]
pub fn room_group(room: &str) -> GroupId {
    room.to_string()
}

/// Build the deterministic group name for a private conversation.
///
/// The two participants are ordered lexicographically so both sessions
/// resolve to the same group regardless of who initiated.
#[must_use]
pub fn private_group(a: &str, b: &str) -> GroupId {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("private_{first}_{second}")
}

/// Build the group name for a user's notification feed.
#[must_use]
pub fn notification_group(user: &str) -> GroupId {
    format!("notifications_{user}")
}

/// Validate a group name.
///
/// # Errors
///
/// Returns an error message if the group name is invalid.
pub fn validate_group_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Group name cannot be empty");
    }
    if name.len() > MAX_GROUP_NAME_LENGTH {
        return Err("Group name too long");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Group name contains invalid characters");
    }
    Ok(())
}

/// A group of live connections.
#[derive(Debug)]
pub struct Group {
    /// Group name.
    name: GroupId,
    /// Member mailboxes keyed by connection ID.
    members: HashMap<ConnectionId, Mailbox>,
}

impl Group {
    /// Create a new, empty group.
    #[must_use]
    pub fn new(name: impl Into<GroupId>) -> Self {
        Self {
            name: name.into(),
            members: HashMap::new(),
        }
    }

    /// Get the group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if a connection is a member.
    #[must_use]
    pub fn is_member(&self, connection_id: &str) -> bool {
        self.members.contains_key(connection_id)
    }

    /// Add a member. Idempotent; re-joining replaces the stored mailbox.
    pub fn insert(&mut self, connection_id: impl Into<ConnectionId>, mailbox: Mailbox) {
        let conn_id = connection_id.into();
        debug!(group = %self.name, connection = %conn_id, "Member joined");
        self.members.insert(conn_id, mailbox);
    }

    /// Remove a member.
    ///
    /// Returns `true` if the connection was a member.
    pub fn remove(&mut self, connection_id: &str) -> bool {
        let removed = self.members.remove(connection_id).is_some();
        if removed {
            debug!(group = %self.name, connection = %connection_id, "Member left");
        }
        removed
    }

    /// Iterate over members as (connection ID, mailbox) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Mailbox)> {
        self.members.iter().map(|(id, mb)| (id.as_str(), mb))
    }

    /// Get a snapshot of member connection IDs.
    #[must_use]
    pub fn member_ids(&self) -> Vec<ConnectionId> {
        self.members.keys().cloned().collect()
    }

    /// Check if the group has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
