//! Durable store interface consumed by the messaging core.
//!
//! Message history and the social graph live outside the core; sessions only
//! need the handful of operations below. [`MemoryStore`] is the in-process
//! implementation used for development and tests. The core never mutates the
//! social graph, it only queries it.

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not complete the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Referenced room does not exist.
    #[error("Unknown room: {0}")]
    UnknownRoom(String),
}

/// A durable chat room record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRecord {
    /// Room name, unique within the store.
    pub name: String,
    /// User recorded as creator, set only when the room is first created.
    pub creator: String,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at: u64,
}

/// A persisted message record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    /// Sender's user ID.
    pub sender: String,
    /// Message body.
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// The durable store operations the messaging core consumes.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a room, creating it with `creator` as creator-of-record if
    /// absent. Returns the room and whether it was created by this call.
    ///
    /// Get-or-create must be atomic: when two sessions race on the same name,
    /// the loser receives the already-created room, not an error.
    async fn get_or_create_room(
        &self,
        name: &str,
        creator: &str,
    ) -> Result<(RoomRecord, bool), StoreError>;

    /// Register a user as a durable member of a room.
    async fn add_member(&self, room: &str, user: &str) -> Result<(), StoreError>;

    /// Persist a room message.
    async fn create_room_message(
        &self,
        room: &str,
        sender: &str,
        content: &str,
        timestamp: u64,
    ) -> Result<(), StoreError>;

    /// Persist a direct message.
    async fn create_direct_message(
        &self,
        sender: &str,
        recipient: &str,
        content: &str,
        timestamp: u64,
    ) -> Result<(), StoreError>;

    /// List the friends of a user.
    async fn list_friends(&self, user: &str) -> Result<Vec<String>, StoreError>;
}

struct RoomEntry {
    record: RoomRecord,
    members: HashSet<String>,
    messages: Vec<MessageRecord>,
}

struct DirectRecord {
    sender: String,
    recipient: String,
    message: MessageRecord,
}

/// In-memory store for development and tests.
#[derive(Default)]
pub struct MemoryStore {
    rooms: DashMap<String, RoomEntry>,
    directs: RwLock<Vec<DirectRecord>>,
    /// Symmetric friendship edges, stored with endpoints sorted.
    friendships: RwLock<HashSet<(String, String)>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a symmetric friendship between two users.
    pub fn add_friendship(&self, a: &str, b: &str) {
        let edge = Self::edge(a, b);
        self.friendships.write().insert(edge);
    }

    /// Read back a room's message history, oldest first.
    #[must_use]
    pub fn room_messages(&self, room: &str) -> Vec<MessageRecord> {
        self.rooms
            .get(room)
            .map(|e| e.messages.clone())
            .unwrap_or_default()
    }

    /// Read back the direct messages between two users, oldest first.
    #[must_use]
    pub fn direct_messages_between(&self, a: &str, b: &str) -> Vec<MessageRecord> {
        self.directs
            .read()
            .iter()
            .filter(|d| {
                (d.sender == a && d.recipient == b) || (d.sender == b && d.recipient == a)
            })
            .map(|d| d.message.clone())
            .collect()
    }

    /// Read back a room's durable member set.
    #[must_use]
    pub fn room_members(&self, room: &str) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|e| e.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn edge(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_or_create_room(
        &self,
        name: &str,
        creator: &str,
    ) -> Result<(RoomRecord, bool), StoreError> {
        let mut created = false;
        // The entry API makes the race atomic: the losing caller gets the
        // winner's record.
        let entry = self.rooms.entry(name.to_string()).or_insert_with(|| {
            created = true;
            debug!(room = %name, creator = %creator, "Creating room");
            RoomEntry {
                record: RoomRecord {
                    name: name.to_string(),
                    creator: creator.to_string(),
                    created_at: banter_core::now_millis(),
                },
                members: HashSet::new(),
                messages: Vec::new(),
            }
        });
        Ok((entry.record.clone(), created))
    }

    async fn add_member(&self, room: &str, user: &str) -> Result<(), StoreError> {
        let mut entry = self
            .rooms
            .get_mut(room)
            .ok_or_else(|| StoreError::UnknownRoom(room.to_string()))?;
        entry.members.insert(user.to_string());
        Ok(())
    }

    async fn create_room_message(
        &self,
        room: &str,
        sender: &str,
        content: &str,
        timestamp: u64,
    ) -> Result<(), StoreError> {
        let mut entry = self
            .rooms
            .get_mut(room)
            .ok_or_else(|| StoreError::UnknownRoom(room.to_string()))?;
        entry.messages.push(MessageRecord {
            sender: sender.to_string(),
            content: content.to_string(),
            timestamp,
        });
        Ok(())
    }

    async fn create_direct_message(
        &self,
        sender: &str,
        recipient: &str,
        content: &str,
        timestamp: u64,
    ) -> Result<(), StoreError> {
        self.directs.write().push(DirectRecord {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            message: MessageRecord {
                sender: sender.to_string(),
                content: content.to_string(),
                timestamp,
            },
        });
        Ok(())
    }

    async fn list_friends(&self, user: &str) -> Result<Vec<String>, StoreError> {
        let friendships = self.friendships.read();
        let mut friends: Vec<String> = friendships
            .iter()
            .filter_map(|(a, b)| {
                if a == user {
                    Some(b.clone())
                } else if b == user {
                    Some(a.clone())
                } else {
                    None
                }
            })
            .collect();
        friends.sort();
        Ok(friends)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_room() {
        let store = MemoryStore::new();

        let (room, created) = store.get_or_create_room("general", "alice").await.unwrap();
        assert!(created);
        assert_eq!(room.creator, "alice");

        // Second caller gets the existing room; creator-of-record unchanged
        let (room, created) = store.get_or_create_room("general", "bob").await.unwrap();
        assert!(!created);
        assert_eq!(room.creator, "alice");
    }

    #[tokio::test]
    async fn test_room_creation_race() {
        let store = std::sync::Arc::new(MemoryStore::new());

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .get_or_create_room("general", &format!("user-{i}"))
                    .await
                    .unwrap()
            }));
        }

        let mut creators = HashSet::new();
        let mut created_count = 0;
        for handle in handles {
            let (room, created) = handle.await.unwrap();
            creators.insert(room.creator);
            if created {
                created_count += 1;
            }
        }

        // Exactly one winner; every caller saw the same creator-of-record
        assert_eq!(created_count, 1);
        assert_eq!(creators.len(), 1);
    }

    #[tokio::test]
    async fn test_room_membership_and_messages() {
        let store = MemoryStore::new();
        store.get_or_create_room("general", "alice").await.unwrap();

        store.add_member("general", "alice").await.unwrap();
        store.add_member("general", "bob").await.unwrap();
        store.add_member("general", "bob").await.unwrap();

        let mut members = store.room_members("general");
        members.sort();
        assert_eq!(members, vec!["alice", "bob"]);

        store
            .create_room_message("general", "alice", "hi", 1_000)
            .await
            .unwrap();
        let messages = store.room_messages("general");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, "alice");
        assert_eq!(messages[0].content, "hi");
    }

    #[tokio::test]
    async fn test_message_to_unknown_room_fails() {
        let store = MemoryStore::new();
        let result = store.create_room_message("nowhere", "alice", "hi", 0).await;
        assert!(matches!(result, Err(StoreError::UnknownRoom(_))));
    }

    #[tokio::test]
    async fn test_direct_messages() {
        let store = MemoryStore::new();

        store
            .create_direct_message("alice", "bob", "hey", 1)
            .await
            .unwrap();
        store
            .create_direct_message("bob", "alice", "hey yourself", 2)
            .await
            .unwrap();
        store
            .create_direct_message("alice", "carol", "hi", 3)
            .await
            .unwrap();

        let between = store.direct_messages_between("alice", "bob");
        assert_eq!(between.len(), 2);
    }

    #[tokio::test]
    async fn test_list_friends_symmetric() {
        let store = MemoryStore::new();
        store.add_friendship("alice", "bob");
        store.add_friendship("carol", "alice");

        assert_eq!(store.list_friends("alice").await.unwrap(), vec!["bob", "carol"]);
        assert_eq!(store.list_friends("bob").await.unwrap(), vec!["alice"]);
        assert!(store.list_friends("dave").await.unwrap().is_empty());
    }
}
