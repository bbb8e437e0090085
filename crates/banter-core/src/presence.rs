//! Presence tracking for Banter.
//!
//! Tracks which users currently hold at least one open notification
//! connection. Presence is reference-counted per user, so a user with two
//! tabs open stays online until the last one closes.
//!
//! One lock guards the whole map: every read observes a consistent snapshot
//! with respect to concurrent connects and disconnects.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

/// The process-wide presence tracker.
///
/// Constructed once at service start and shared by reference; never a
/// module-level singleton.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    /// User ID -> open notification connection count.
    online: RwLock<HashMap<String, usize>>,
}

impl PresenceTracker {
    /// Create a new presence tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new notification connection for a user.
    ///
    /// Returns `true` if the user just came online (first connection).
    pub fn mark_online(&self, user: &str) -> bool {
        let mut online = self.online.write();
        let count = online.entry(user.to_string()).or_insert(0);
        *count += 1;
        let came_online = *count == 1;
        if came_online {
            debug!(user = %user, "User came online");
        }
        came_online
    }

    /// Record a closed notification connection for a user.
    ///
    /// Returns `true` if the user just went offline (last connection).
    /// A user with no recorded connections is a no-op.
    pub fn mark_offline(&self, user: &str) -> bool {
        let mut online = self.online.write();
        match online.get_mut(user) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                online.remove(user);
                debug!(user = %user, "User went offline");
                true
            }
            None => false,
        }
    }

    /// Check whether a user is online.
    #[must_use]
    pub fn is_online(&self, user: &str) -> bool {
        self.online.read().contains_key(user)
    }

    /// Total number of online users.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.online.read().len()
    }

    /// Count how many of the given users are online, in one snapshot.
    #[must_use]
    pub fn online_count_among(&self, users: &[String]) -> usize {
        let online = self.online.read();
        users.iter().filter(|u| online.contains_key(*u)).count()
    }

    /// Report, for each of the given users, whether they are online.
    ///
    /// Read-only and side-effect free; the whole answer comes from one
    /// snapshot of the presence map.
    #[must_use]
    pub fn friends_online_status(&self, friends: &[String]) -> Vec<(String, bool)> {
        let online = self.online.read();
        friends
            .iter()
            .map(|f| (f.clone(), online.contains_key(f)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_online_offline() {
        let presence = PresenceTracker::new();

        assert!(presence.mark_online("alice"));
        assert!(presence.is_online("alice"));

        assert!(presence.mark_offline("alice"));
        assert!(!presence.is_online("alice"));
    }

    #[test]
    fn test_refcounted_presence() {
        let presence = PresenceTracker::new();

        // Three tabs open, one closed: still online
        assert!(presence.mark_online("alice"));
        assert!(!presence.mark_online("alice"));
        assert!(!presence.mark_online("alice"));
        assert!(!presence.mark_offline("alice"));
        assert!(presence.is_online("alice"));

        assert!(!presence.mark_offline("alice"));
        assert!(presence.mark_offline("alice"));
        assert!(!presence.is_online("alice"));
    }

    #[test]
    fn test_mark_offline_unknown_user() {
        let presence = PresenceTracker::new();
        assert!(!presence.mark_offline("ghost"));
        assert!(!presence.is_online("ghost"));
    }

    #[test]
    fn test_online_count_among() {
        let presence = PresenceTracker::new();
        presence.mark_online("bob");
        presence.mark_online("carol");

        let friends = vec![
            "bob".to_string(),
            "carol".to_string(),
            "dave".to_string(),
        ];
        assert_eq!(presence.online_count_among(&friends), 2);
        assert_eq!(presence.online_count_among(&[]), 0);
    }

    #[test]
    fn test_friends_online_status() {
        let presence = PresenceTracker::new();
        presence.mark_online("bob");

        let friends = vec!["bob".to_string(), "carol".to_string()];
        let status = presence.friends_online_status(&friends);
        assert_eq!(
            status,
            vec![("bob".to_string(), true), ("carol".to_string(), false)]
        );
    }
}
