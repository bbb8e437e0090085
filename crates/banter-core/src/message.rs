//! Transient message and identifier types for Banter.
//!
//! A [`ChatMessage`] is the validated in-flight form of an inbound payload.
//! It exists only between receive and fan-out; the durable record is written
//! separately by the external store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::group::ConnectionId;

/// Atomic counter for ensuring unique connection IDs even within the same
/// nanosecond.
static CONN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Current time as milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Generate a process-unique connection ID.
#[must_use]
pub fn generate_connection_id() -> ConnectionId {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;
    let counter = CONN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("conn_{nanos}_{counter}")
}

/// Message validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    /// Message body is empty or whitespace-only.
    #[error("Message body is empty")]
    EmptyBody,
}

/// Where a message is headed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageScope {
    /// A named chat room.
    Room(String),
    /// A direct message to one recipient.
    Direct(String),
}

/// A validated in-flight chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Sender's user ID.
    pub sender: String,
    /// Message body, guaranteed non-empty.
    pub body: String,
    /// Originating room or direct recipient.
    pub scope: MessageScope,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl ChatMessage {
    /// Create a message, validating that the body is non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::EmptyBody`] for an empty or whitespace-only
    /// body.
    pub fn new(
        sender: impl Into<String>,
        body: impl Into<String>,
        scope: MessageScope,
    ) -> Result<Self, MessageError> {
        let body = body.into();
        if body.trim().is_empty() {
            return Err(MessageError::EmptyBody);
        }
        Ok(Self {
            sender: sender.into(),
            body,
            scope,
            timestamp: now_millis(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg =
            ChatMessage::new("alice", "hello", MessageScope::Room("general".to_string())).unwrap();
        assert_eq!(msg.sender, "alice");
        assert_eq!(msg.body, "hello");
        assert!(msg.timestamp > 0);
    }

    #[test]
    fn test_empty_body_rejected() {
        let scope = MessageScope::Direct("bob".to_string());
        assert_eq!(
            ChatMessage::new("alice", "", scope.clone()),
            Err(MessageError::EmptyBody)
        );
        assert_eq!(
            ChatMessage::new("alice", "   \n", scope),
            Err(MessageError::EmptyBody)
        );
    }

    #[test]
    fn test_unique_connection_ids() {
        let id1 = generate_connection_id();
        let id2 = generate_connection_id();
        assert_ne!(id1, id2);
        assert!(id1.starts_with("conn_"));
    }
}
