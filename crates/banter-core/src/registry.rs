//! Group registry for Banter.
//!
//! The registry maps group names to their live member connections. Groups are
//! created lazily on first join and discarded when the last member leaves;
//! membership here is ephemeral and never outlives a connection, unlike
//! durable room membership which lives in the external store.

use crate::group::{validate_group_name, ConnectionId, Group, GroupId, Mailbox};
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Invalid group name.
    #[error("Invalid group name: {0}")]
    InvalidGroup(&'static str),
}

/// The process-wide group registry.
///
/// All mutation goes through the per-group map entries, so concurrent joins
/// and leaves to the same group serialize on that entry and a fan-out
/// dispatch never observes a half-applied membership change.
pub struct GroupRegistry {
    /// Groups indexed by name.
    groups: DashMap<GroupId, Group>,
    /// Reverse index: connection ID -> groups it joined.
    memberships: DashMap<ConnectionId, dashmap::DashSet<GroupId>>,
}

impl GroupRegistry {
    /// Create a new, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
            memberships: DashMap::new(),
        }
    }

    /// Add a connection to a group, creating the group if absent.
    ///
    /// Idempotent: joining a group twice replaces the stored mailbox and is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the group name is invalid.
    pub fn join(
        &self,
        group_id: &str,
        connection_id: &str,
        mailbox: Mailbox,
    ) -> Result<(), RegistryError> {
        validate_group_name(group_id).map_err(RegistryError::InvalidGroup)?;

        let mut entry = self
            .groups
            .entry(group_id.to_string())
            .or_insert_with(|| {
                debug!(group = %group_id, "Creating group");
                Group::new(group_id)
            });
        entry.insert(connection_id, mailbox);

        self.memberships
            .entry(connection_id.to_string())
            .or_default()
            .insert(group_id.to_string());

        Ok(())
    }

    /// Remove a connection from a group.
    ///
    /// A no-op if the group or the member is absent, since disconnect races
    /// are expected. The group entry is discarded when it empties.
    pub fn leave(&self, group_id: &str, connection_id: &str) {
        if let Some(conn_groups) = self.memberships.get(connection_id) {
            let _ = conn_groups.remove(group_id);
        }
        self.remove_member(group_id, connection_id);
    }

    /// Remove a connection from every group it joined.
    pub fn leave_all(&self, connection_id: &str) {
        if let Some((_, groups)) = self.memberships.remove(connection_id) {
            for group_id in groups.iter() {
                self.remove_member(group_id.as_str(), connection_id);
            }
        }
        debug!(connection = %connection_id, "Left all groups");
    }

    fn remove_member(&self, group_id: &str, connection_id: &str) {
        if let Some(mut entry) = self.groups.get_mut(group_id) {
            entry.remove(connection_id);
            if entry.is_empty() {
                drop(entry); // Release the lock
                self.groups.remove(group_id);
                debug!(group = %group_id, "Discarded empty group");
            }
        }
    }

    /// Get a snapshot of a group's members as (connection ID, mailbox) pairs.
    #[must_use]
    pub fn members(&self, group_id: &str) -> Vec<(ConnectionId, Mailbox)> {
        self.groups
            .get(group_id)
            .map(|g| g.iter().map(|(id, mb)| (id.to_string(), mb.clone())).collect())
            .unwrap_or_default()
    }

    /// Run `f` with exclusive access to a group, if it exists.
    ///
    /// Used by the broker so one dispatch holds the group entry for its whole
    /// duration: a concurrent join or leave is either fully included or fully
    /// excluded, and concurrent publishers to the same group serialize here.
    pub fn with_group<R>(&self, group_id: &str, f: impl FnOnce(&mut Group) -> R) -> Option<R> {
        self.groups
            .get_mut(group_id)
            .map(|mut entry| f(entry.value_mut()))
    }

    /// Check if a group exists.
    #[must_use]
    pub fn group_exists(&self, group_id: &str) -> bool {
        self.groups.contains_key(group_id)
    }

    /// Get the member count for a group.
    #[must_use]
    pub fn member_count(&self, group_id: &str) -> usize {
        self.groups
            .get(group_id)
            .map(|g| g.member_count())
            .unwrap_or(0)
    }

    /// Get the groups a connection has joined.
    #[must_use]
    pub fn connection_groups(&self, connection_id: &str) -> Vec<GroupId> {
        self.memberships
            .get(connection_id)
            .map(|s| s.iter().map(|g| g.clone()).collect())
            .unwrap_or_default()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            group_count: self.groups.len(),
            connection_count: self.memberships.len(),
        }
    }
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone)]
pub struct RegistryStats {
    /// Number of live groups.
    pub group_count: usize,
    /// Number of connections holding at least one membership.
    pub connection_count: usize,
}
