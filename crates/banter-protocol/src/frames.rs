//! Frame types for the Banter wire protocol.
//!
//! Frames are JSON objects carried in WebSocket text messages. Clients send a
//! single inbound shape; the server replies with either a chat relay or a
//! tagged notification event.

use serde::{Deserialize, Serialize};

/// An inbound frame from a client: `{"message": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientFrame {
    /// Message body.
    pub message: String,
}

impl ClientFrame {
    /// Create a new client frame.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A notification event delivered on a user's notification feed.
///
/// Events are a closed set, tagged by `"type"` on the wire and dispatched
/// through `match` rather than a runtime name lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A direct message arrived while its recipient was outside the chat.
    NewMessage {
        /// Sender's username.
        from: String,
        /// Message body.
        text: String,
    },

    /// A friend's online status changed.
    StatusUpdate {
        /// The friend whose status changed.
        friend: String,
        /// Whether that friend is now online.
        is_online: bool,
        /// The recipient's own count of online friends after the change.
        online_count: usize,
    },

    /// Snapshot of online friends, pushed once when a notification feed opens.
    InitialStatus {
        /// Usernames of friends currently online.
        online_friends: Vec<String>,
        /// Number of online friends.
        online_count: usize,
    },
}

impl Event {
    /// Create a new-message event.
    #[must_use]
    pub fn new_message(from: impl Into<String>, text: impl Into<String>) -> Self {
        Event::NewMessage {
            from: from.into(),
            text: text.into(),
        }
    }

    /// Create a status-update event.
    #[must_use]
    pub fn status_update(friend: impl Into<String>, is_online: bool, online_count: usize) -> Self {
        Event::StatusUpdate {
            friend: friend.into(),
            is_online,
            online_count,
        }
    }

    /// Create an initial-status event.
    #[must_use]
    pub fn initial_status(online_friends: Vec<String>, online_count: usize) -> Self {
        Event::InitialStatus {
            online_friends,
            online_count,
        }
    }
}

/// An outbound frame from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// A chat message relayed to the other members of a room or private pair:
    /// `{"message": "...", "username": "..."}`.
    Relay {
        /// Message body.
        message: String,
        /// Sender's username.
        username: String,
    },

    /// A notification event (carries a `"type"` tag).
    Event(Event),
}

impl ServerFrame {
    /// Create a relay frame.
    #[must_use]
    pub fn relay(message: impl Into<String>, username: impl Into<String>) -> Self {
        ServerFrame::Relay {
            message: message.into(),
            username: username.into(),
        }
    }
}

impl From<Event> for ServerFrame {
    fn from(event: Event) -> Self {
        ServerFrame::Event(event)
    }
}
