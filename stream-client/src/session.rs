//! Session actor
//!
//! One task owns the connection state machine, the transport, and the
//! subscription registry. Everything that can change session state
//! arrives on one of three inputs:
//!
//! - commands from the [`StreamClient`](crate::StreamClient) and its subscriptions
//! - events reported by the current transport
//! - the reconnect backoff deadline
//!
//! State handlers run from [`Session::change`] and may chain into further
//! transitions.

use crate::client::ClientEvent;
use crate::config::ClientConfig;
use crate::error::StreamError;
use crate::observable::Emitter;
use crate::registry::{connection_policy, ConnectionPolicy, SubscriptionRegistry};
use crate::retry::RetryPolicy;
use crate::sequencer::Ingest;
use crate::state::{ConnectionState, StateCell};
use crate::subscription::{StreamEvent, Subscription};
use crate::transport::{
    ConnectionId, Connector, Transport, TransportEvent, TransportEvents, TransportOptions,
};
use std::sync::Arc;
use stream_protocol::{
    ControlEvent, ControlRequest, Credential, EventId, Inbound, StreamFrame, StreamPosition,
    StreamRequest, StreamUrn,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

/// Requests handled by the session task
#[derive(Debug)]
pub(crate) enum Command {
    Auth(Credential),
    Subscribe {
        urn: StreamUrn,
        resume_seq: Option<u64>,
        resume_event_id: Option<EventId>,
        /// Handed to the new subscription so it can close itself
        commands: mpsc::UnboundedSender<Command>,
        reply: oneshot::Sender<Subscription>,
    },
    Close {
        key: String,
    },
    Disconnect,
    Shutdown,
}

pub(crate) type TransportEventTx = mpsc::UnboundedSender<(ConnectionId, TransportEvent)>;
pub(crate) type TransportEventRx = mpsc::UnboundedReceiver<(ConnectionId, TransportEvent)>;

pub(crate) struct Session<C> {
    config: ClientConfig,
    retry: RetryPolicy,
    connector: C,
    state: StateCell,
    events: Arc<Emitter<ClientEvent>>,

    transport: Option<Box<dyn Transport>>,
    connection: ConnectionId,
    transport_tx: TransportEventTx,

    credential: Option<Credential>,
    last_error: Option<StreamError>,
    retry_count: u32,
    rebalanced_to: Option<String>,
    reconnect_at: Option<Instant>,

    registry: SubscriptionRegistry,
    /// Subscriptions to tear down once the current disconnect completes
    pending_teardown: Option<Vec<String>>,
}

impl<C: Connector> Session<C> {
    pub(crate) fn new(
        config: ClientConfig,
        connector: C,
        state: StateCell,
        events: Arc<Emitter<ClientEvent>>,
        transport_tx: TransportEventTx,
    ) -> Self {
        Self {
            retry: RetryPolicy::from_config(&config),
            config,
            connector,
            state,
            events,
            transport: None,
            connection: ConnectionId::default(),
            transport_tx,
            credential: None,
            last_error: None,
            retry_count: 0,
            rebalanced_to: None,
            reconnect_at: None,
            registry: SubscriptionRegistry::new(),
            pending_teardown: None,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut transport_events: TransportEventRx,
    ) {
        debug!("Stream session started");

        loop {
            let reconnect_at = self.reconnect_at;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some((id, event)) = transport_events.recv() => {
                    self.handle_transport_event(id, event);
                }
                _ = sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    self.on_reconnect_timer();
                }
            }
        }

        self.shutdown();
        debug!("Stream session stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Auth(credential) => self.authenticate(credential),
            Command::Subscribe {
                urn,
                resume_seq,
                resume_event_id,
                commands,
                reply,
            } => {
                let subscription = self.subscribe(urn, resume_seq, resume_event_id, commands);
                // The caller may have stopped waiting; the subscription stays registered.
                let _ = reply.send(subscription);
            }
            Command::Close { key } => self.unsubscribe(&key),
            Command::Disconnect => self.disconnect(),
            Command::Shutdown => {}
        }
    }

    fn handle_transport_event(&mut self, id: ConnectionId, event: TransportEvent) {
        if id != self.connection {
            trace!(connection = %id, ?event, "Ignoring event from retired connection");
            return;
        }
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Message(text) => self.on_message(&text),
            TransportEvent::Close => {
                self.transport = None;
                self.change(ConnectionState::Disconnected);
            }
        }
    }

    // State machine

    fn change(&mut self, new: ConnectionState) {
        let Some(change) = self.state.set(new) else {
            return;
        };
        debug!(old = %change.old, new = %change.new, "Connection state changed");
        let old = change.old;
        self.events.emit_observed(ClientEvent::StateChanged(change));

        match new {
            ConnectionState::Connecting => self.connect_or_report(),
            ConnectionState::Connected => self.ensure_subscription_state(),
            ConnectionState::Streaming => {
                self.retry_count = 0;
                self.events.emit(ClientEvent::Start);
            }
            ConnectionState::Disconnecting => self.begin_disconnect(old),
            ConnectionState::Disconnected => self.on_disconnected(old),
            ConnectionState::Reconnecting => self.schedule_reconnect(),
            ConnectionState::Rebalancing => self.on_rebalancing(),
            ConnectionState::Error => self.on_error(old),
        }
    }

    fn connect_or_report(&mut self) {
        if let Err(error) = self.connect() {
            self.report(error);
        }
    }

    fn connect(&mut self) -> Result<(), StreamError> {
        if self.transport.is_some() {
            return Err(StreamError::AlreadyConnected);
        }

        let target = self.config.stream_url(self.stream_host());
        let options = TransportOptions::for_attempt(
            &self.connector.supported_framings(),
            self.rebalanced_to.is_some(),
            self.config.debug,
        );
        self.connection = self.connection.next();
        let events = TransportEvents::new(self.connection, self.transport_tx.clone());
        self.retry_count = self.retry_count.saturating_add(1);

        let url = match target {
            Ok(url) => url,
            Err(error) => {
                warn!(%error, attempt = self.retry_count, "Cannot resolve stream url");
                events.closed();
                return Ok(());
            }
        };

        info!(
            %url,
            attempt = self.retry_count,
            framings = ?options.allowed_framings,
            "Opening stream connection"
        );
        match self.connector.open(&url, options, events.clone()) {
            Ok(transport) => self.transport = Some(transport),
            Err(error) => {
                warn!(%error, %url, "Transport failed to open");
                events.closed();
            }
        }
        Ok(())
    }

    fn schedule_reconnect(&mut self) {
        if self.transport.is_some() {
            info!("Closing live connection to reconnect");
            self.retire_transport();
        }
        let delay = self.retry.delay_for(self.retry_count);
        info!(
            attempt = self.retry_count + 1,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting"
        );
        self.reconnect_at = Some(Instant::now() + delay);
    }

    fn on_reconnect_timer(&mut self) {
        let state = self.state.get();
        if state != ConnectionState::Reconnecting {
            debug!(%state, "Ignoring stale reconnect timer");
            return;
        }
        self.connect_or_report();
    }

    fn on_open(&mut self) {
        let state = self.state.get();
        if !matches!(
            state,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        ) {
            debug!(%state, "Ignoring transport open");
            return;
        }
        self.registry.reset_acks();
        self.change(ConnectionState::Connected);
    }

    fn begin_disconnect(&mut self, old: ConnectionState) {
        self.reconnect_at = None;
        self.pending_teardown = Some(self.registry.keys());

        if old == ConnectionState::Streaming {
            match self.send_control(&ControlRequest::Disconnect) {
                // The server closes the connection in response.
                Ok(()) => return,
                Err(error) => warn!(%error, "Failed to send disconnect"),
            }
        }
        if !self.close_transport() {
            self.change(ConnectionState::Disconnected);
        }
    }

    fn on_disconnected(&mut self, old: ConnectionState) {
        self.retire_transport();

        match old {
            ConnectionState::Disconnecting => {
                let keys = self
                    .pending_teardown
                    .take()
                    .unwrap_or_else(|| self.registry.keys());
                self.tear_down(keys, None);
                // Anything subscribed while the disconnect was in flight
                self.ensure_subscription_state();
            }
            ConnectionState::Error => {
                let reason = self
                    .last_error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "session failed".to_string());
                let keys = self.registry.keys();
                self.tear_down(keys, Some(StreamError::Unavailable(reason)));
            }
            ConnectionState::Rebalancing => self.change(ConnectionState::Reconnecting),
            _ => self.on_unplanned_close(old),
        }
    }

    fn on_unplanned_close(&mut self, old: ConnectionState) {
        let url = self.current_url();
        let error = match old {
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                StreamError::ConnectFailed {
                    attempt: self.retry_count,
                    url: url.clone(),
                }
            }
            _ => StreamError::ConnectionDropped { url: url.clone() },
        };
        warn!(%error, "Connection closed");
        self.last_error = Some(error);

        if self.retry.should_retry(self.retry_count) {
            self.change(ConnectionState::Reconnecting);
        } else {
            let error = StreamError::RetriesExceeded {
                attempts: self.retry_count,
                url,
            };
            error!(%error, budget = self.retry.budget(), "Giving up on connection");
            self.last_error = Some(error);
            self.change(ConnectionState::Error);
        }
    }

    fn on_rebalancing(&mut self) {
        self.retry_count = 0;
        info!(hostname = ?self.rebalanced_to, "Rebalancing session");
        if !self.close_transport() {
            self.change(ConnectionState::Disconnected);
        }
    }

    fn on_error(&mut self, old: ConnectionState) {
        let error = self
            .last_error
            .clone()
            .unwrap_or_else(|| StreamError::Unavailable("session failed".to_string()));
        error!(%error, "Stream session failed");
        self.events.emit(ClientEvent::Error(error));

        if old == ConnectionState::Streaming && self.close_transport() {
            return;
        }
        self.change(ConnectionState::Disconnected);
    }

    /// Finish the given subscriptions and announce the end of the session
    fn tear_down(&mut self, keys: Vec<String>, error: Option<StreamError>) {
        for key in keys {
            if let Some(entry) = self.registry.remove(&key) {
                if let Some(error) = &error {
                    entry.fail(error.clone());
                }
                entry.finish();
            }
        }
        self.retry_count = 0;
        self.last_error = None;
        info!(remaining = self.registry.len(), "Stream session torn down");
        self.events.emit(ClientEvent::End);
        self.events.emit(ClientEvent::Close);
    }

    fn ensure_subscription_state(&mut self) {
        match connection_policy(self.registry.len(), self.state.get()) {
            ConnectionPolicy::Disconnect => self.change(ConnectionState::Disconnecting),
            ConnectionPolicy::Connect => self.change(ConnectionState::Connecting),
            ConnectionPolicy::Subscribe => self.send_subscribe(),
            ConnectionPolicy::Wait => {}
        }
    }

    // Commands

    fn authenticate(&mut self, credential: Credential) {
        let changed = self.credential.as_ref() != Some(&credential);
        self.credential = Some(credential);

        if changed && self.state.get() == ConnectionState::Streaming {
            info!("Credential changed while streaming, reconnecting");
            self.change(ConnectionState::Reconnecting);
        }
    }

    fn subscribe(
        &mut self,
        urn: StreamUrn,
        resume_seq: Option<u64>,
        resume_event_id: Option<EventId>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Subscription {
        let (subscription, created) =
            self.registry
                .register(urn, resume_seq, resume_event_id, commands);
        if !created {
            debug!(urn = %subscription.urn(), "Already subscribed");
            return subscription;
        }

        self.rebalanced_to = None;
        info!(
            urn = %subscription.urn(),
            url = %self.current_url(),
            stats = %self.registry.stats(),
            "Subscribing"
        );
        self.ensure_subscription_state();
        subscription
    }

    fn unsubscribe(&mut self, key: &str) {
        let Some(entry) = self.registry.remove(key) else {
            debug!(key, "Close for unknown subscription");
            return;
        };
        info!(urn = %entry.handle().urn(), "Unsubscribing");
        entry.finish();
        self.ensure_subscription_state();
    }

    fn disconnect(&mut self) {
        if self.transport.is_none() && !self.state.get().is_active() {
            warn!(state = %self.state.get(), "Disconnect requested while not connected");
            return;
        }
        info!("Disconnecting");
        self.change(ConnectionState::Disconnecting);
    }

    fn shutdown(&mut self) {
        self.reconnect_at = None;
        if self.state.get() == ConnectionState::Streaming {
            if let Err(error) = self.send_control(&ControlRequest::Disconnect) {
                warn!(%error, "Failed to send disconnect on shutdown");
            }
        }
        self.retire_transport();

        let keys = self.registry.keys();
        if !keys.is_empty() || self.state.get() != ConnectionState::Disconnected {
            self.tear_down(keys, None);
        }
        if let Some(change) = self.state.set(ConnectionState::Disconnected) {
            self.events.emit_observed(ClientEvent::StateChanged(change));
        }
    }

    // Inbound traffic

    fn on_message(&mut self, text: &str) {
        if self.config.debug {
            debug!(payload = %text, "Received message");
        }
        match stream_protocol::decode(text) {
            Ok(Inbound::Control { body }) => self.on_control(body),
            Ok(Inbound::Stream(frame)) => self.on_stream_frame(frame),
            Err(error) => {
                let error = StreamError::from(error);
                warn!(%error, "Discarding unreadable message");
                self.events.emit(ClientEvent::Error(error));
            }
        }
    }

    fn on_control(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Subscribed { stream_id } => {
                let state = self.state.get();
                if !matches!(
                    state,
                    ConnectionState::Connected | ConnectionState::Streaming
                ) {
                    warn!(%state, "Ignoring subscribed ack");
                    return;
                }
                self.change(ConnectionState::Streaming);

                match stream_id {
                    Some(stream_id) => match self.registry.get_mut(&stream_id) {
                        Some(entry) => entry.start(),
                        None => debug!(%stream_id, "Ack for unknown stream"),
                    },
                    None => {
                        for entry in self.registry.iter_mut() {
                            if !entry.is_acked() {
                                entry.start();
                            }
                        }
                    }
                }
            }
            ControlEvent::Rebalance { hostname } => {
                info!(%hostname, "Server requested rebalance");
                self.rebalanced_to = Some(hostname);
                self.change(ConnectionState::Rebalancing);
            }
            ControlEvent::RewindFailed { stream_id, error } => {
                let reason = error.unwrap_or_else(|| "rewind refused".to_string());
                warn!(%stream_id, %reason, "Rewind failed, resetting stream position");
                match self.registry.get_mut(&stream_id) {
                    Some(entry) => entry.rewind_failed(reason),
                    None => debug!(%stream_id, "Rewind failure for unknown stream"),
                }
            }
            ControlEvent::AuthFailed { stream_id, error } => {
                let reason = error.unwrap_or_else(|| "authorization failed".to_string());
                warn!(%stream_id, %reason, "Subscription rejected");
                if let Some(entry) = self.registry.remove(&stream_id) {
                    entry.fail(StreamError::AuthFailed { stream_id, reason });
                    entry.finish();
                    self.ensure_subscription_state();
                }
            }
            ControlEvent::Error { error } => {
                let message = error.unwrap_or_else(|| "Unknown server error".to_string());
                error!(%message, "Server reported an error");
                self.last_error = Some(StreamError::Server(message));
                self.change(ConnectionState::Error);
            }
            ControlEvent::Unknown => debug!("Ignoring unsupported control action"),
        }
    }

    fn on_stream_frame(&mut self, frame: StreamFrame) {
        let state = self.state.get();
        if state != ConnectionState::Streaming {
            warn!(%state, stream_id = %frame.stream_id, "Stream message while not streaming");
        }

        let rewind = {
            let Some(entry) = self.registry.get_mut(&frame.stream_id) else {
                debug!(stream_id = %frame.stream_id, "Dropping message for unknown stream");
                return;
            };
            match entry.sequencer.ingest(frame.sequence, frame.event_id.as_ref()) {
                Ingest::Deliver => {
                    entry.handle().deliver(StreamEvent::from(frame));
                    None
                }
                Ingest::ResumePointReached => {
                    debug!(stream_id = %frame.stream_id, sequence = frame.sequence, "Rewind reached resume point");
                    None
                }
                Ingest::Duplicate => {
                    warn!(stream_id = %frame.stream_id, sequence = frame.sequence, "Dropping repeated message");
                    None
                }
                Ingest::AwaitingRewind => {
                    debug!(stream_id = %frame.stream_id, sequence = frame.sequence, "Dropping message while rewinding");
                    None
                }
                Ingest::Gap { resume_from } => {
                    error!(
                        stream_id = %frame.stream_id,
                        sequence = frame.sequence,
                        resume_from,
                        "Message(s) lost in flight, rewinding"
                    );
                    Some(entry.position())
                }
            }
        };

        if let Some(position) = rewind {
            let request = ControlRequest::Rewind(self.stream_request(vec![position]));
            if let Err(error) = self.send_control(&request) {
                self.report(error);
            }
        }
    }

    // Outbound traffic

    fn send_subscribe(&mut self) {
        let request = ControlRequest::Subscribe(self.stream_request(self.registry.positions()));
        debug!(stats = %self.registry.stats(), "Sending aggregate subscribe");
        if let Err(error) = self.send_control(&request) {
            self.report(error);
        }
    }

    fn stream_request(&self, streams: Vec<StreamPosition>) -> StreamRequest {
        StreamRequest {
            hostname: self.stream_host().to_string(),
            lf_token: self.credential.clone(),
            streams,
        }
    }

    fn send_control(&mut self, request: &ControlRequest) -> Result<(), StreamError> {
        let state = self.state.get();
        let text = stream_protocol::encode(request)?;
        let transport = self
            .transport
            .as_mut()
            .ok_or(StreamError::NotConnected { state })?;

        if self.config.debug {
            debug!(action = request.action(), payload = %text, "Sending control message");
        } else {
            trace!(action = request.action(), "Sending control message");
        }
        transport.send(text)?;
        Ok(())
    }

    // Helpers

    /// Host for the next attempt: the rebalance target while it is fresh
    fn stream_host(&self) -> &str {
        match &self.rebalanced_to {
            Some(host) if self.retry_count < self.config.rebalance_retry_window => host,
            _ => &self.config.hostname,
        }
    }

    fn current_url(&self) -> String {
        let host = self.stream_host();
        self.config
            .stream_url(host)
            .map(|url| url.to_string())
            .unwrap_or_else(|_| host.to_string())
    }

    /// Ask the live transport to close, keeping it until it reports back
    fn close_transport(&mut self) -> bool {
        match self.transport.as_mut() {
            Some(transport) => {
                transport.close();
                true
            }
            None => false,
        }
    }

    /// Drop the live transport; anything it reports afterwards is ignored
    fn retire_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            self.connection = self.connection.next();
            transport.close();
        }
    }

    fn report(&self, error: StreamError) {
        error!(%error, kind = ?error.kind(), "Stream client error");
        self.events.emit(ClientEvent::Error(error));
    }
}
