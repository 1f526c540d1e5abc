//! Error types for the stream-client crate.

use crate::state::ConnectionState;
use stream_protocol::ProtocolError;

/// Coarse classification of a [`StreamError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Retry budget exhausted or the target could not be resolved
    ConnectFailure,
    /// Unexpected close of an established connection
    TransportDrop,
    /// Malformed inbound frame; the connection stays up
    ProtocolError,
    /// Server-pushed `error` action; fatal to the connection
    ServerError,
    /// Per-subscription, recoverable
    RewindFailed,
    /// Per-subscription, fatal to that subscription
    AuthFailed,
    /// Subscription torn down because the session failed
    Unavailable,
    /// Misuse of the API
    ProgrammingError,
}

/// Errors surfaced by the client, its subscriptions, and its transport.
///
/// Errors are `Clone` because a single failure may be reported to the
/// client listener and to several subscriptions at once.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    /// A connection attempt failed before the transport opened
    #[error("Failed to connect #{attempt}, bad address or service down: {url}")]
    ConnectFailed {
        /// Attempt number since the last successful stream
        attempt: u32,
        /// Target of the failed attempt
        url: String,
    },

    /// The retry budget was exhausted
    #[error("Connect retries exceeded, bad address or server down: {url}")]
    RetriesExceeded {
        /// Attempts made since the last successful stream
        attempts: u32,
        /// Last target attempted
        url: String,
    },

    /// An established connection closed unexpectedly
    #[error("Connection dropped, attempting to reconnect to: {url}")]
    ConnectionDropped {
        /// Target of the dropped connection
        url: String,
    },

    /// An inbound frame could not be decoded
    #[error("{0}")]
    Protocol(String),

    /// The server reported an error; the message is the server's text
    #[error("{0}")]
    Server(String),

    /// The server refused to replay a stream
    #[error("Rewind failed for stream {stream_id}: {reason}")]
    RewindFailed { stream_id: String, reason: String },

    /// The server rejected the credential for a stream
    #[error("Authorization failed for stream {stream_id}: {reason}")]
    AuthFailed { stream_id: String, reason: String },

    /// The session was torn down after a fatal error
    #[error("Stream unavailable: {0}")]
    Unavailable(String),

    /// A control message was sent with no live transport
    #[error("Can't send control message, not connected (state: {state})")]
    NotConnected { state: ConnectionState },

    /// A connect was attempted while a transport is already owned
    #[error("Already connected, close the current transport first")]
    AlreadyConnected,

    /// `unpipe` was called with a sink that is not attached
    #[error("Destination not registered")]
    SinkNotRegistered,

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The session task is no longer running
    #[error("Stream client is closed")]
    ClientClosed,

    /// `events()` was already called on this observable
    #[error("Event stream already taken")]
    EventsTaken,

    /// The transport rejected an operation
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl StreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::ConnectFailed { .. }
            | StreamError::RetriesExceeded { .. }
            | StreamError::Configuration(_) => ErrorKind::ConnectFailure,
            StreamError::ConnectionDropped { .. } | StreamError::Transport(_) => {
                ErrorKind::TransportDrop
            }
            StreamError::Protocol(_) => ErrorKind::ProtocolError,
            StreamError::Server(_) => ErrorKind::ServerError,
            StreamError::RewindFailed { .. } => ErrorKind::RewindFailed,
            StreamError::AuthFailed { .. } => ErrorKind::AuthFailed,
            StreamError::Unavailable(_) => ErrorKind::Unavailable,
            StreamError::NotConnected { .. }
            | StreamError::AlreadyConnected
            | StreamError::SinkNotRegistered
            | StreamError::ClientClosed
            | StreamError::EventsTaken => ErrorKind::ProgrammingError,
        }
    }
}

impl From<ProtocolError> for StreamError {
    fn from(error: ProtocolError) -> Self {
        StreamError::Protocol(error.to_string())
    }
}

/// Errors reported by a [`Transport`](crate::transport::Transport) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// None of the allowed framings can be used
    #[error("No permitted framing available")]
    NoFraming,

    /// The channel could not be opened
    #[error("Open failed: {0}")]
    Open(String),

    /// A frame could not be written
    #[error("Send failed: {0}")]
    Send(String),

    /// The channel is already closed
    #[error("Transport closed")]
    Closed,
}

/// Convenience type alias for Results using StreamError.
pub type Result<T> = std::result::Result<T, StreamError>;
