//! Connection sessions.
//!
//! One session owns each live WebSocket connection and mediates between the
//! transport and the group registry, presence tracker, and durable store.
//! A session moves through three states: admitted but not yet joined
//! (activation pending), active, and closed. Teardown runs exactly once even
//! when a receive suspension and an external close race.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use banter_core::{
    generate_connection_id, notification_group, private_group, room_group, ChatMessage,
    ConnectionId, Mailbox, MessageScope, RegistryError,
};
use banter_protocol::{decode_client, encode, Event, ServerFrame};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::handlers::AppState;
use crate::metrics;
use crate::store::{Store, StoreError};

/// Errors that terminate a session during activation.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Durable store failure while resolving room state.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Group registration failure.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// What kind of conversation a connection is for, derived from its route.
#[derive(Debug, Clone)]
pub enum SessionKind {
    /// A named chat room.
    Room {
        /// Room name from the path.
        room: String,
    },
    /// A private conversation with one counterpart.
    Private {
        /// Counterpart's user ID from the path.
        peer: String,
    },
    /// The user's own notification feed.
    Notifications,
}

/// One live connection.
pub struct Session {
    id: ConnectionId,
    user: String,
    kind: SessionKind,
    state: Arc<AppState>,
    /// Sender half of this connection's outbound queue.
    mailbox: Mailbox,
    /// Set when this session incremented presence; cleared on decrement.
    presence_marked: bool,
    closed: bool,
}

impl Session {
    /// Create a session and the receiving half of its outbound queue.
    #[must_use]
    pub fn new(
        user: impl Into<String>,
        kind: SessionKind,
        state: Arc<AppState>,
    ) -> (Self, mpsc::UnboundedReceiver<ServerFrame>) {
        let (mailbox, outbound) = mpsc::unbounded_channel();
        let session = Self {
            id: generate_connection_id(),
            user: user.into(),
            kind,
            state,
            mailbox,
            presence_marked: false,
            closed: false,
        };
        (session, outbound)
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the authenticated user.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Transition to the active state: resolve durable room state, join the
    /// in-memory groups, and for notification sessions update presence and
    /// push the initial status snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the room cannot be resolved in the store or the
    /// group cannot be joined; the caller closes the session.
    pub async fn activate(&mut self) -> Result<(), SessionError> {
        match self.kind.clone() {
            SessionKind::Room { room } => {
                let (record, created) = self
                    .state
                    .store
                    .get_or_create_room(&room, &self.user)
                    .await?;
                if created {
                    debug!(room = %room, creator = %self.user, "Room created");
                }
                self.state.store.add_member(&record.name, &self.user).await?;
                self.state
                    .registry
                    .join(&room_group(&room), &self.id, self.mailbox.clone())?;
            }
            SessionKind::Private { peer } => {
                self.state.registry.join(
                    &private_group(&self.user, &peer),
                    &self.id,
                    self.mailbox.clone(),
                )?;
            }
            SessionKind::Notifications => {
                let came_online = self.state.presence.mark_online(&self.user);
                self.presence_marked = true;

                // The snapshot goes into our own mailbox before the group
                // join, so no live event can reach the client first.
                match self.state.notifier.initial_status(&self.user).await {
                    Ok(event) => {
                        let _ = self.mailbox.send(event.into());
                    }
                    Err(e) => {
                        error!(user = %self.user, error = %e, "Failed to compute initial status");
                        metrics::record_store_error("list_friends");
                    }
                }

                self.state.registry.join(
                    &notification_group(&self.user),
                    &self.id,
                    self.mailbox.clone(),
                )?;

                if came_online {
                    if let Err(e) = self
                        .state
                        .notifier
                        .broadcast_status_change(&self.user, true)
                        .await
                    {
                        error!(user = %self.user, error = %e, "Failed to notify friends of connect");
                        metrics::record_store_error("list_friends");
                    }
                }
                metrics::set_presence_online(self.state.presence.online_count());
            }
        }

        metrics::set_active_groups(self.state.registry.stats().group_count);
        debug!(connection = %self.id, user = %self.user, "Session active");
        Ok(())
    }

    /// Handle one inbound text payload.
    ///
    /// Every failure here is a recoverable client-input error: the payload is
    /// dropped, the connection stays open, and no state changes.
    pub async fn handle_inbound(&self, text: &str) {
        metrics::record_message("inbound");

        let frame = match decode_client(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection = %self.id, error = %e, "Malformed payload");
                metrics::record_error("parse");
                return;
            }
        };

        match &self.kind {
            SessionKind::Room { room } => {
                let msg = match ChatMessage::new(
                    self.user.as_str(),
                    frame.message,
                    MessageScope::Room(room.clone()),
                ) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(connection = %self.id, error = %e, "Rejected message");
                        metrics::record_error("empty_message");
                        return;
                    }
                };

                self.persist_room(room, &msg).await;

                let relay = ServerFrame::relay(msg.body, self.user.clone());
                let report = self
                    .state
                    .broker
                    .publish(&room_group(room), &relay, Some(&self.id));
                metrics::record_fanout(report);
            }

            SessionKind::Private { peer } => {
                let msg = match ChatMessage::new(
                    self.user.as_str(),
                    frame.message,
                    MessageScope::Direct(peer.clone()),
                ) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(connection = %self.id, error = %e, "Rejected message");
                        metrics::record_error("empty_message");
                        return;
                    }
                };

                self.persist_direct(peer, &msg).await;

                let relay = ServerFrame::relay(msg.body.clone(), self.user.clone());
                let report = self.state.broker.publish(
                    &private_group(&self.user, peer),
                    &relay,
                    Some(&self.id),
                );
                metrics::record_fanout(report);

                // The counterpart may be outside the chat; ping their feed
                self.state
                    .notifier
                    .notify(peer, Event::new_message(self.user.as_str(), msg.body.as_str()));
            }

            SessionKind::Notifications => {
                debug!(connection = %self.id, "Ignoring inbound frame on notification feed");
            }
        }
    }

    /// Persist a room message, honoring the configured ordering.
    ///
    /// A write failure is a store fault, surfaced separately from fan-out; it
    /// never suppresses delivery.
    async fn persist_room(&self, room: &str, msg: &ChatMessage) {
        if self.state.config.persistence.persist_before_fanout {
            if let Err(e) = self
                .state
                .store
                .create_room_message(room, &msg.sender, &msg.body, msg.timestamp)
                .await
            {
                error!(room = %room, error = %e, "Failed to persist room message");
                metrics::record_store_error("room_message");
            }
        } else {
            let store = self.state.store.clone();
            let room = room.to_string();
            let (sender, body, timestamp) = (msg.sender.clone(), msg.body.clone(), msg.timestamp);
            tokio::spawn(async move {
                if let Err(e) = store
                    .create_room_message(&room, &sender, &body, timestamp)
                    .await
                {
                    error!(room = %room, error = %e, "Failed to persist room message");
                    metrics::record_store_error("room_message");
                }
            });
        }
    }

    /// Persist a direct message, honoring the configured ordering.
    async fn persist_direct(&self, peer: &str, msg: &ChatMessage) {
        if self.state.config.persistence.persist_before_fanout {
            if let Err(e) = self
                .state
                .store
                .create_direct_message(&msg.sender, peer, &msg.body, msg.timestamp)
                .await
            {
                error!(peer = %peer, error = %e, "Failed to persist direct message");
                metrics::record_store_error("direct_message");
            }
        } else {
            let store = self.state.store.clone();
            let peer = peer.to_string();
            let (sender, body, timestamp) = (msg.sender.clone(), msg.body.clone(), msg.timestamp);
            tokio::spawn(async move {
                if let Err(e) = store
                    .create_direct_message(&sender, &peer, &body, timestamp)
                    .await
                {
                    error!(peer = %peer, error = %e, "Failed to persist direct message");
                    metrics::record_store_error("direct_message");
                }
            });
        }
    }

    /// Transition to the closed state: leave all groups and, for
    /// notification sessions, release this connection's presence count.
    ///
    /// Idempotent; later calls are no-ops.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.state.registry.leave_all(&self.id);

        if matches!(self.kind, SessionKind::Notifications) && self.presence_marked {
            self.presence_marked = false;
            let went_offline = self.state.presence.mark_offline(&self.user);
            metrics::set_presence_online(self.state.presence.online_count());
            if went_offline {
                if let Err(e) = self
                    .state
                    .notifier
                    .broadcast_status_change(&self.user, false)
                    .await
                {
                    error!(user = %self.user, error = %e, "Failed to notify friends of disconnect");
                    metrics::record_store_error("list_friends");
                }
            }
        }

        metrics::set_active_groups(self.state.registry.stats().group_count);
        debug!(connection = %self.id, "Session closed");
    }

    /// Drive the WebSocket until it closes, then tear the session down.
    pub async fn run(
        mut self,
        socket: WebSocket,
        mut outbound: mpsc::UnboundedReceiver<ServerFrame>,
    ) {
        let (mut sender, mut receiver) = socket.split();

        loop {
            tokio::select! {
                biased;

                // Frames fanned out to this connection
                frame = outbound.recv() => {
                    let Some(frame) = frame else { break };
                    match encode(&frame) {
                        Ok(text) => {
                            metrics::record_message("outbound");
                            if sender.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            error!(connection = %self.id, error = %e, "Failed to encode frame");
                        }
                    }
                }

                // Inbound from the WebSocket
                msg = receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if text.len() > self.state.config.limits.max_message_size {
                                warn!(connection = %self.id, size = text.len(), "Oversized payload");
                                metrics::record_error("oversized");
                                continue;
                            }
                            self.handle_inbound(&text).await;
                        }
                        Some(Ok(Message::Binary(_))) => {
                            warn!(connection = %self.id, "Ignoring binary frame");
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Close(_))) => {
                            debug!(connection = %self.id, "Received close frame");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(connection = %self.id, error = %e, "WebSocket error");
                            metrics::record_error("websocket");
                            break;
                        }
                        None => {
                            debug!(connection = %self.id, "WebSocket stream ended");
                            break;
                        }
                    }
                }
            }
        }

        self.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenIdentity;
    use crate::config::Config;
    use crate::store::{MemoryStore, RoomRecord, Store, StoreError};
    use async_trait::async_trait;

    fn app_state(store: Arc<MemoryStore>, persist_before_fanout: bool) -> Arc<AppState> {
        let mut config = Config::default();
        config.persistence.persist_before_fanout = persist_before_fanout;
        Arc::new(AppState::new(config, store, Arc::new(TokenIdentity)))
    }

    async fn active_session(
        state: &Arc<AppState>,
        user: &str,
        kind: SessionKind,
    ) -> (Session, mpsc::UnboundedReceiver<ServerFrame>) {
        let (mut session, rx) = Session::new(user, kind, state.clone());
        session.activate().await.unwrap();
        (session, rx)
    }

    fn room(name: &str) -> SessionKind {
        SessionKind::Room {
            room: name.to_string(),
        }
    }

    fn private(peer: &str) -> SessionKind {
        SessionKind::Private {
            peer: peer.to_string(),
        }
    }

    #[tokio::test]
    async fn test_room_message_relayed_and_persisted() {
        let store = Arc::new(MemoryStore::new());
        let state = app_state(store.clone(), true);

        let (alice, mut alice_rx) = active_session(&state, "alice", room("general")).await;
        let (_bob, mut bob_rx) = active_session(&state, "bob", room("general")).await;
        let (_carol, mut carol_rx) = active_session(&state, "carol", room("general")).await;

        alice.handle_inbound(r#"{"message": "hi"}"#).await;

        let expected = ServerFrame::relay("hi", "alice");
        assert_eq!(bob_rx.try_recv().unwrap(), expected);
        assert_eq!(carol_rx.try_recv().unwrap(), expected);
        // Exactly once each, and never echoed to the sender
        assert!(bob_rx.try_recv().is_err());
        assert!(carol_rx.try_recv().is_err());
        assert!(alice_rx.try_recv().is_err());

        let messages = store.room_messages("general");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, "alice");
        assert_eq!(messages[0].content, "hi");
    }

    #[tokio::test]
    async fn test_room_activation_records_creator_and_membership() {
        let store = Arc::new(MemoryStore::new());
        let state = app_state(store.clone(), true);

        let (_alice, _rx) = active_session(&state, "alice", room("general")).await;
        let (_bob, _rx2) = active_session(&state, "bob", room("general")).await;

        let (record, created) = store.get_or_create_room("general", "zed").await.unwrap();
        assert!(!created);
        assert_eq!(record.creator, "alice");

        let mut members = store.room_members("general");
        members.sort();
        assert_eq!(members, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_private_message_flow() {
        let store = Arc::new(MemoryStore::new());
        let state = app_state(store.clone(), true);

        // Both sides resolve the same pair group regardless of who initiated
        let (alice, mut alice_rx) = active_session(&state, "alice", private("bob")).await;
        let (_bob, mut bob_rx) = active_session(&state, "bob", private("alice")).await;

        // Bob also has his notification feed open
        let (_bob_feed, mut feed_rx) =
            active_session(&state, "bob", SessionKind::Notifications).await;
        let _ = feed_rx.try_recv(); // initial status

        alice.handle_inbound(r#"{"message": "psst"}"#).await;

        assert_eq!(bob_rx.try_recv().unwrap(), ServerFrame::relay("psst", "alice"));
        assert!(alice_rx.try_recv().is_err());
        assert_eq!(
            feed_rx.try_recv().unwrap(),
            ServerFrame::Event(Event::new_message("alice", "psst"))
        );

        let directs = store.direct_messages_between("alice", "bob");
        assert_eq!(directs.len(), 1);
        assert_eq!(directs[0].content, "psst");
    }

    #[tokio::test]
    async fn test_initial_status_is_first_frame() {
        let store = Arc::new(MemoryStore::new());
        store.add_friendship("alice", "bob");
        store.add_friendship("alice", "carol");
        let state = app_state(store.clone(), true);

        // Bob online, carol offline
        let (_bob, _bob_rx) = active_session(&state, "bob", SessionKind::Notifications).await;

        let (_alice, mut alice_rx) =
            active_session(&state, "alice", SessionKind::Notifications).await;

        assert_eq!(
            alice_rx.try_recv().unwrap(),
            ServerFrame::Event(Event::initial_status(vec!["bob".to_string()], 1))
        );
        assert!(alice_rx.try_recv().is_err());

        // A later connect arrives as a live event, after the snapshot
        let (_carol, _carol_rx) = active_session(&state, "carol", SessionKind::Notifications).await;
        assert_eq!(
            alice_rx.try_recv().unwrap(),
            ServerFrame::Event(Event::status_update("carol", true, 2))
        );
    }

    #[tokio::test]
    async fn test_disconnect_notifies_friends_once() {
        let store = Arc::new(MemoryStore::new());
        store.add_friendship("alice", "bob");
        let state = app_state(store.clone(), true);

        let (_alice, mut alice_rx) =
            active_session(&state, "alice", SessionKind::Notifications).await;
        let (mut bob, _bob_rx) = active_session(&state, "bob", SessionKind::Notifications).await;
        let _ = alice_rx.try_recv(); // initial status
        let _ = alice_rx.try_recv(); // bob came online

        bob.close().await;
        assert_eq!(
            alice_rx.try_recv().unwrap(),
            ServerFrame::Event(Event::status_update("bob", false, 0))
        );

        // Teardown is idempotent: no duplicate on a racing second close
        bob.close().await;
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_multi_tab_presence() {
        let store = Arc::new(MemoryStore::new());
        store.add_friendship("alice", "bob");
        let state = app_state(store.clone(), true);

        let (_alice, mut alice_rx) =
            active_session(&state, "alice", SessionKind::Notifications).await;
        let _ = alice_rx.try_recv(); // initial status

        let (mut tab1, _rx1) = active_session(&state, "bob", SessionKind::Notifications).await;
        let _ = alice_rx.try_recv(); // bob came online
        let (mut tab2, _rx2) = active_session(&state, "bob", SessionKind::Notifications).await;

        // Second tab did not re-announce
        assert!(alice_rx.try_recv().is_err());

        // First tab closing does not mark bob offline
        tab1.close().await;
        assert!(alice_rx.try_recv().is_err());
        assert!(state.presence.is_online("bob"));

        tab2.close().await;
        assert_eq!(
            alice_rx.try_recv().unwrap(),
            ServerFrame::Event(Event::status_update("bob", false, 0))
        );
        assert!(!state.presence.is_online("bob"));
    }

    #[tokio::test]
    async fn test_malformed_and_empty_payloads_dropped() {
        let store = Arc::new(MemoryStore::new());
        let state = app_state(store.clone(), true);

        let (alice, _alice_rx) = active_session(&state, "alice", room("general")).await;
        let (_bob, mut bob_rx) = active_session(&state, "bob", room("general")).await;

        alice.handle_inbound("not json").await;
        alice.handle_inbound(r#"{"wrong": "shape"}"#).await;
        alice.handle_inbound(r#"{"message": "   "}"#).await;

        assert!(bob_rx.try_recv().is_err());
        assert!(store.room_messages("general").is_empty());
    }

    #[tokio::test]
    async fn test_close_releases_group_membership() {
        let store = Arc::new(MemoryStore::new());
        let state = app_state(store.clone(), true);

        let (mut alice, _rx) = active_session(&state, "alice", room("general")).await;
        assert!(state.registry.group_exists("general"));

        alice.close().await;
        assert!(!state.registry.group_exists("general"));

        // Durable membership survives the ephemeral group
        assert_eq!(store.room_members("general"), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_concurrent_persistence_still_fans_out() {
        let store = Arc::new(MemoryStore::new());
        let state = app_state(store.clone(), false);

        let (alice, _alice_rx) = active_session(&state, "alice", room("general")).await;
        let (_bob, mut bob_rx) = active_session(&state, "bob", room("general")).await;

        alice.handle_inbound(r#"{"message": "hi"}"#).await;
        assert_eq!(bob_rx.try_recv().unwrap(), ServerFrame::relay("hi", "alice"));

        // The spawned write lands shortly after
        for _ in 0..100 {
            if !store.room_messages("general").is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        assert_eq!(store.room_messages("general").len(), 1);
    }

    /// Store whose message writes always fail.
    struct FailingStore(MemoryStore);

    #[async_trait]
    impl Store for FailingStore {
        async fn get_or_create_room(
            &self,
            name: &str,
            creator: &str,
        ) -> Result<(RoomRecord, bool), StoreError> {
            self.0.get_or_create_room(name, creator).await
        }

        async fn add_member(&self, room: &str, user: &str) -> Result<(), StoreError> {
            self.0.add_member(room, user).await
        }

        async fn create_room_message(
            &self,
            _room: &str,
            _sender: &str,
            _content: &str,
            _timestamp: u64,
        ) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk full".to_string()))
        }

        async fn create_direct_message(
            &self,
            _sender: &str,
            _recipient: &str,
            _content: &str,
            _timestamp: u64,
        ) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk full".to_string()))
        }

        async fn list_friends(&self, user: &str) -> Result<Vec<String>, StoreError> {
            self.0.list_friends(user).await
        }
    }

    #[tokio::test]
    async fn test_persist_failure_does_not_suppress_fanout() {
        let store: Arc<dyn Store> = Arc::new(FailingStore(MemoryStore::new()));
        let mut config = Config::default();
        config.persistence.persist_before_fanout = true;
        let state = Arc::new(AppState::new(config, store, Arc::new(TokenIdentity)));

        let (alice, _alice_rx) = active_session(&state, "alice", room("general")).await;
        let (_bob, mut bob_rx) = active_session(&state, "bob", room("general")).await;

        alice.handle_inbound(r#"{"message": "hi"}"#).await;
        assert_eq!(bob_rx.try_recv().unwrap(), ServerFrame::relay("hi", "alice"));
    }
}
