//! Encoding and decoding of Banter frames.
//!
//! Frames travel as JSON text in WebSocket text messages, one frame per
//! message, so no length prefixing is needed here. The codec enforces a size
//! bound on inbound frames and maps JSON failures into [`ProtocolError`].

use thiserror::Error;

use crate::frames::{ClientFrame, ServerFrame};

/// Maximum inbound frame size in bytes (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding/decoding error.
    #[error("Invalid frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a server frame to its JSON text form.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(frame: &ServerFrame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode an inbound client frame from JSON text.
///
/// # Errors
///
/// Returns an error if the text is oversized or not a valid client frame.
pub fn decode_client(text: &str) -> Result<ClientFrame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Decode a server frame from JSON text.
///
/// Used by test harnesses and client implementations.
///
/// # Errors
///
/// Returns an error if the text is not a valid server frame.
pub fn decode_server(text: &str) -> Result<ServerFrame, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
