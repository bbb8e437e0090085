//! # banter-protocol
//!
//! Wire protocol definitions for the Banter messaging core.
//!
//! The protocol is deliberately small: clients send `{"message": <string>}`
//! and receive either a relayed chat message or a tagged notification event.
//! See [`frames`] for the frame shapes and [`codec`] for the JSON text codec.

pub mod codec;
pub mod frames;

pub use codec::{decode_client, decode_server, encode, ProtocolError, MAX_FRAME_SIZE};
pub use frames::{ClientFrame, Event, ServerFrame};
