//! # banter-core
//!
//! Group registry, fan-out broker, and presence tracking for the Banter
//! realtime messaging core.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Group** - Named set of live connections (rooms, private pairs, feeds)
//! - **GroupRegistry** - Lazily-created, ephemeral group membership
//! - **FanoutBroker** - Best-effort per-member message delivery
//! - **PresenceTracker** - Reference-counted online status per user
//! - **ChatMessage** - Validated in-flight message form
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│   Broker    │────▶│   Registry  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │  Presence   │
//! └─────────────┘
//! ```

pub mod broker;
pub mod group;
pub mod message;
pub mod presence;
pub mod registry;

pub use broker::{FanoutBroker, FanoutReport};
pub use group::{
    notification_group, private_group, room_group, ConnectionId, Group, GroupId, Mailbox,
};
pub use message::{generate_connection_id, now_millis, ChatMessage, MessageError, MessageScope};
pub use presence::PresenceTracker;
pub use registry::{GroupRegistry, RegistryError, RegistryStats};
