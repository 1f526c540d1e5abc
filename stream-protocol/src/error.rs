//! Error types for encoding and decoding session messages

use thiserror::Error;

/// Errors that can occur while encoding or decoding protocol messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Inbound text was not valid JSON or did not match a known envelope
    #[error("Invalid JSON in message: {0}")]
    Malformed(String),

    /// An outbound message could not be serialized
    #[error("Failed to encode control message: {0}")]
    Encode(String),
}

/// Result type alias for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
