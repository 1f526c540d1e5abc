//! Connection states and change notifications
//!
//! The session owns exactly one [`ConnectionState`] at a time. Every
//! transition produces a [`StateChange`] and is published on a watch
//! channel so handles can read the current value without a round trip.

use std::fmt;
use std::time::Instant;
use tokio::sync::watch;

/// Lifecycle of the single multiplexed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Streaming,
    Disconnecting,
    Reconnecting,
    Rebalancing,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Streaming => "STREAMING",
            ConnectionState::Disconnecting => "DISCONNECTING",
            ConnectionState::Reconnecting => "RECONNECTING",
            ConnectionState::Rebalancing => "REBALANCING",
            ConnectionState::Error => "ERROR",
        }
    }

    /// States in which the session holds, or is working towards, a connection
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Streaming
                | ConnectionState::Reconnecting
                | ConnectionState::Rebalancing
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition between two connection states
#[derive(Debug, Clone)]
pub struct StateChange {
    pub old: ConnectionState,
    pub new: ConnectionState,

    /// When the transition happened
    pub at: Instant,
}

impl StateChange {
    pub fn new(old: ConnectionState, new: ConnectionState) -> Self {
        Self {
            old,
            new,
            at: Instant::now(),
        }
    }
}

impl PartialEq for StateChange {
    fn eq(&self, other: &Self) -> bool {
        // Timestamp not included in equality
        self.old == other.old && self.new == other.new
    }
}

/// Authoritative state value, owned by the session task
pub(crate) struct StateCell {
    value: ConnectionState,
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    pub(crate) fn new() -> (Self, watch::Receiver<ConnectionState>) {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        (
            Self {
                value: ConnectionState::Disconnected,
                tx,
            },
            rx,
        )
    }

    pub(crate) fn get(&self) -> ConnectionState {
        self.value
    }

    /// Move to `new`, returning the transition, or `None` if already there
    pub(crate) fn set(&mut self, new: ConnectionState) -> Option<StateChange> {
        if self.value == new {
            return None;
        }
        let old = self.value;
        self.value = new;
        self.tx.send_replace(new);
        Some(StateChange::new(old, new))
    }
}
