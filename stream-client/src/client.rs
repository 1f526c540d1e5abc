//! Stream client handle
//!
//! [`StreamClient`] is the public entry point. It spawns the session task
//! on the current Tokio runtime and talks to it over a command channel.
//! No connection is made until the first subscription is registered, and
//! the connection is dropped again once the last one is closed.

use crate::config::ClientConfig;
use crate::error::{Result, StreamError};
use crate::observable::{Emitter, EventStream, Observable};
use crate::session::{Command, Session};
use crate::state::{ConnectionState, StateCell, StateChange};
use crate::subscription::Subscription;
use crate::transport::Connector;
use std::sync::Arc;
use std::time::Duration;
use stream_protocol::{Credential, EventId, StreamUrn};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::Instrument;
use uuid::Uuid;

/// Client-level notifications
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Only emitted while the event stream is held
    StateChanged(StateChange),
    /// The session reached STREAMING
    Start,
    Error(StreamError),
    /// The session was torn down
    End,
    Close,
}

/// Multiplexed, resumable stream client
///
/// # Example
///
/// ```rust,ignore
/// use stream_client::{ClientConfig, StreamClient, ChannelSink};
///
/// let client = StreamClient::new(ClientConfig::new("stream.example.com"), connector)?;
/// client.auth("someBase64EncodedToken")?;
///
/// let subscription = client.subscribe("urn:example:user=42:personalStream").await?;
/// let (sink, mut events) = ChannelSink::new();
/// subscription.pipe(&sink);
///
/// while let Some(event) = events.recv().await {
///     println!("#{} {}", event.sequence, event.body);
/// }
/// ```
///
/// Dropping the client shuts the session down; open subscriptions receive
/// `End` and `Close`.
pub struct StreamClient {
    id: Uuid,

    /// Send commands to the session task
    commands: mpsc::UnboundedSender<Command>,

    /// Current state, published by the session task
    state: watch::Receiver<ConnectionState>,

    events: Arc<Emitter<ClientEvent>>,
}

impl StreamClient {
    /// Create a client and start its session task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<C: Connector>(config: ClientConfig, connector: C) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| {
            StreamError::Configuration(
                "StreamClient must be created within a Tokio runtime".to_string(),
            )
        })?;

        let id = Uuid::new_v4();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (state, state_rx) = StateCell::new();
        let events = Arc::new(Emitter::new());

        let span = tracing::info_span!("stream_client", client_id = %id, host = %config.hostname);
        let session = Session::new(config, connector, state, Arc::clone(&events), transport_tx);
        runtime.spawn(session.run(command_rx, transport_rx).instrument(span));

        Ok(Self {
            id,
            commands: command_tx,
            state: state_rx,
            events,
        })
    }

    /// Identifier attached to this client's log records
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Set the credential sent with every subscribe and rewind.
    ///
    /// Changing the credential while streaming reconnects so the new
    /// handshake carries it.
    pub fn auth(&self, credential: impl Into<Credential>) -> Result<()> {
        self.send(Command::Auth(credential.into()))
    }

    /// Subscribe to a stream from its live position
    pub async fn subscribe(&self, urn: impl Into<StreamUrn>) -> Result<Subscription> {
        self.subscribe_from(urn, None, None).await
    }

    /// Subscribe to a stream, resuming after the given position.
    ///
    /// If the stream is already subscribed the existing subscription is
    /// returned and the resume point is ignored.
    pub async fn subscribe_from(
        &self,
        urn: impl Into<StreamUrn>,
        resume_seq: Option<u64>,
        resume_event_id: Option<EventId>,
    ) -> Result<Subscription> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Subscribe {
            urn: urn.into(),
            resume_seq,
            resume_event_id,
            commands: self.commands.clone(),
            reply,
        })?;
        response.await.map_err(|_| StreamError::ClientClosed)
    }

    /// Close the connection and end every subscription
    pub fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch channel carrying the current state
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the session reaches `target`
    ///
    /// Returns `false` if `timeout` expires first or the session stops.
    /// Transient states may be skipped by the watch channel; use
    /// [`ClientEvent::StateChanged`] to observe every transition.
    pub async fn wait_for_state(&self, target: ConnectionState, timeout: Duration) -> bool {
        let mut state = self.state.clone();
        let reached = async move {
            loop {
                if *state.borrow_and_update() == target {
                    return true;
                }
                if state.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, reached).await.unwrap_or(false)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| StreamError::ClientClosed)
    }
}

impl Observable for StreamClient {
    type Event = ClientEvent;

    fn events(&self) -> Result<EventStream<ClientEvent>> {
        self.events.take()
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
