//! Notification routing.
//!
//! Every user has exactly one notification group, their private feed for
//! asynchronous events: a direct message arriving outside an open chat, a
//! friend coming online or going offline. Events for offline users are
//! simply dropped; there is no durable queue.

use std::sync::Arc;

use banter_core::{notification_group, FanoutBroker, FanoutReport, PresenceTracker};
use banter_protocol::Event;
use tracing::{debug, trace};

use crate::store::{Store, StoreError};

/// Routes notification events to per-user feeds.
pub struct NotificationRouter {
    broker: Arc<FanoutBroker>,
    presence: Arc<PresenceTracker>,
    store: Arc<dyn Store>,
}

impl NotificationRouter {
    /// Create a router over the broker, presence tracker, and store.
    #[must_use]
    pub fn new(
        broker: Arc<FanoutBroker>,
        presence: Arc<PresenceTracker>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            broker,
            presence,
            store,
        }
    }

    /// Deliver an event to a user's notification feed.
    ///
    /// Delivers to every open notification connection the user holds; if the
    /// user is offline the event is dropped.
    pub fn notify(&self, user: &str, event: Event) -> FanoutReport {
        let group = notification_group(user);
        let report = self.broker.publish(&group, &event.into(), None);
        if report.delivered == 0 {
            trace!(user = %user, "Dropped notification for offline user");
        }
        report
    }

    /// Compute the initial-status event for a user opening their feed.
    ///
    /// The online-friends list comes from one presence snapshot, so the
    /// client sees a state no live event predates.
    ///
    /// # Errors
    ///
    /// Returns an error if the friend list cannot be read.
    pub async fn initial_status(&self, user: &str) -> Result<Event, StoreError> {
        let friends = self.store.list_friends(user).await?;
        let online_friends: Vec<String> = self
            .presence
            .friends_online_status(&friends)
            .into_iter()
            .filter_map(|(friend, is_online)| is_online.then_some(friend))
            .collect();
        let online_count = online_friends.len();
        Ok(Event::initial_status(online_friends, online_count))
    }

    /// Tell each online friend of `user` that their status changed.
    ///
    /// The carried count is recomputed from each friend's own perspective,
    /// after the presence change has been applied.
    ///
    /// # Errors
    ///
    /// Returns an error if a friend list cannot be read.
    pub async fn broadcast_status_change(
        &self,
        user: &str,
        is_online: bool,
    ) -> Result<(), StoreError> {
        let friends = self.store.list_friends(user).await?;
        for friend in friends {
            if !self.presence.is_online(&friend) {
                continue;
            }
            let their_friends = self.store.list_friends(&friend).await?;
            let online_count = self.presence.online_count_among(&their_friends);
            debug!(
                user = %user,
                friend = %friend,
                is_online,
                online_count,
                "Friend status update"
            );
            self.notify(&friend, Event::status_update(user, is_online, online_count));
        }
        Ok(())
    }
}
