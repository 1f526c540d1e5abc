//! Transport collaborator boundary
//!
//! The client does not implement a socket. It is handed a [`Connector`]
//! that opens a duplex text channel and reports open, message, and close
//! through the [`TransportEvents`] it was given. Events are tagged with
//! the connection they belong to, so anything a retired connection
//! reports afterwards is ignored by the session.

use crate::error::TransportError;
use std::borrow::Cow;
use std::fmt;
use tokio::sync::mpsc;
use url::Url;

/// Name of a low-level framing strategy a transport may use
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Framing(Cow<'static, str>);

impl Framing {
    /// Direct persistent socket framing
    pub const WEBSOCKET: Framing = Framing(Cow::Borrowed("websocket"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Options passed to [`Connector::open`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Framings the transport may choose from
    pub allowed_framings: Vec<Framing>,
    pub debug: bool,
}

impl TransportOptions {
    /// Options for a connection attempt.
    ///
    /// Direct socket framing is only allowed once the server has
    /// rebalanced the session to a host known to support it.
    pub fn for_attempt(available: &[Framing], rebalanced: bool, debug: bool) -> Self {
        let allowed_framings = available
            .iter()
            .filter(|framing| rebalanced || **framing != Framing::WEBSOCKET)
            .cloned()
            .collect();
        Self {
            allowed_framings,
            debug,
        }
    }

    pub fn allows(&self, framing: &Framing) -> bool {
        self.allowed_framings.contains(framing)
    }
}

/// Identifies one physical connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Something a transport reports back to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    /// Raw text payload of one inbound frame
    Message(String),
    Close,
}

/// Callback sink handed to a transport when it is opened
#[derive(Debug, Clone)]
pub struct TransportEvents {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<(ConnectionId, TransportEvent)>,
}

impl TransportEvents {
    pub(crate) fn new(
        id: ConnectionId,
        tx: mpsc::UnboundedSender<(ConnectionId, TransportEvent)>,
    ) -> Self {
        Self { id, tx }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }

    pub fn opened(&self) {
        self.report(TransportEvent::Open);
    }

    pub fn message(&self, text: impl Into<String>) {
        self.report(TransportEvent::Message(text.into()));
    }

    pub fn closed(&self) {
        self.report(TransportEvent::Close);
    }

    fn report(&self, event: TransportEvent) {
        // The session may already be gone; nothing to deliver to then.
        let _ = self.tx.send((self.id, event));
    }
}

/// A live duplex text channel
pub trait Transport: Send {
    /// Write one text frame. Must not block.
    fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Begin closing. The transport reports [`TransportEvent::Close`] once
    /// the channel is down.
    fn close(&mut self);
}

/// Opens transports for the session
pub trait Connector: Send + 'static {
    /// Framings this connector can offer
    fn supported_framings(&self) -> Vec<Framing>;

    /// Start opening a channel to `url`.
    ///
    /// Completion is reported through `events`. Returning an error is
    /// treated the same as an immediate close.
    fn open(
        &mut self,
        url: &Url,
        options: TransportOptions,
        events: TransportEvents,
    ) -> Result<Box<dyn Transport>, TransportError>;
}
