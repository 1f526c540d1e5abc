//! Scripted mock server and connector for driving the client in tests.
//!
//! The connector never touches the network. Every open is recorded and
//! answered immediately; every control message the client sends is
//! recorded and handed to a responder closure whose replies are pushed
//! back as inbound frames. A `disconnect` always closes the connection.

#![allow(dead_code)]

use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stream_client::{
    ClientConfig, ClientEvent, Connector, Framing, Sink, SinkError, StreamError, StreamEvent,
    SubscriptionEvent, Transport, TransportError, TransportEvents, TransportOptions,
};
use stream_protocol::{ControlEnvelope, ControlEvent, ControlRequest, Inbound, StreamFrame};
use url::Url;

pub const HOST: &str = "unit.test";
pub const REBALANCE_HOST: &str = "rebalance.unit.test";
pub const URN: &str = "urn:livefyre:cnn.fyre.co:user=user4996:personalStream";
pub const OTHER_URN: &str = "urn:livefyre:cnn.fyre.co:topic=news:topicStream";
pub const TOKEN: &str = "someBase64EncodedToken";

/// Retry budget of 3 with a short base delay
pub fn config() -> ClientConfig {
    ClientConfig::new(HOST).with_retry(3, Duration::from_millis(10))
}

/// Let the session task drain its inputs; time is paused in these tests
pub async fn settle() {
    tokio::time::sleep(Duration::from_secs(30)).await;
}

/// Framings a SockJS-style transport offers
pub fn all_framings() -> Vec<Framing> {
    [
        "websocket",
        "xdr-streaming",
        "xhr-streaming",
        "iframe-eventsource",
        "iframe-htmlfile",
        "xdr-polling",
        "xhr-polling",
        "iframe-xhr-polling",
        "jsonp-polling",
    ]
    .into_iter()
    .map(Framing::new)
    .collect()
}

/// What the server does in response to a control message
#[derive(Debug, Clone)]
pub enum Reply {
    Control(ControlEvent),
    Close,
}

impl Reply {
    pub fn subscribed() -> Self {
        Reply::Control(ControlEvent::Subscribed { stream_id: None })
    }

    pub fn rebalance(hostname: &str) -> Self {
        Reply::Control(ControlEvent::Rebalance {
            hostname: hostname.to_string(),
        })
    }

    pub fn error(message: &str) -> Self {
        Reply::Control(ControlEvent::Error {
            error: Some(message.to_string()),
        })
    }
}

/// Receives the request and the index of the connection it arrived on
pub type Responder = Box<dyn FnMut(&ControlRequest, usize) -> Vec<Reply> + Send>;

#[derive(Debug, Clone)]
pub struct OpenRecord {
    pub url: String,
    pub framings: Vec<Framing>,
    pub debug: bool,
}

struct Connection {
    events: TransportEvents,
    closed: Arc<AtomicBool>,
}

impl Connection {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.events.closed();
        }
    }
}

#[derive(Default)]
struct ServerState {
    opens: Vec<OpenRecord>,
    sent: Vec<ControlEnvelope>,
    current: Option<Connection>,
    responder: Option<Responder>,
    refuse_all: bool,
    refused_hosts: Vec<String>,
    fail_sends: bool,
}

#[derive(Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A server that acknowledges every subscribe
    pub fn acknowledging() -> Self {
        let server = Self::new();
        server.respond_with(|request, _| match request {
            ControlRequest::Subscribe(_) => vec![Reply::subscribed()],
            _ => vec![],
        });
        server
    }

    pub fn respond_with(
        &self,
        responder: impl FnMut(&ControlRequest, usize) -> Vec<Reply> + Send + 'static,
    ) {
        self.state.lock().unwrap().responder = Some(Box::new(responder));
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            state: Arc::clone(&self.state),
        }
    }

    /// Refuse every future connection attempt
    pub fn refuse_all(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_all = refuse;
    }

    /// Make every send on a live connection fail
    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    pub fn refuse_host(&self, host: &str) {
        self.state.lock().unwrap().refused_hosts.push(host.to_string());
    }

    pub fn opens(&self) -> Vec<OpenRecord> {
        self.state.lock().unwrap().opens.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().opens.len()
    }

    pub fn envelopes(&self) -> Vec<ControlEnvelope> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent(&self) -> Vec<ControlRequest> {
        self.envelopes().into_iter().map(|e| e.body).collect()
    }

    pub fn subscribes(&self) -> Vec<ControlRequest> {
        self.sent()
            .into_iter()
            .filter(|r| matches!(r, ControlRequest::Subscribe(_)))
            .collect()
    }

    pub fn rewinds(&self) -> Vec<ControlRequest> {
        self.sent()
            .into_iter()
            .filter(|r| matches!(r, ControlRequest::Rewind(_)))
            .collect()
    }

    pub fn disconnects(&self) -> usize {
        self.sent()
            .iter()
            .filter(|r| matches!(r, ControlRequest::Disconnect))
            .count()
    }

    /// Push raw text on the current connection
    pub fn push_raw(&self, text: &str) {
        let state = self.state.lock().unwrap();
        if let Some(connection) = &state.current {
            connection.events.message(text);
        }
    }

    pub fn push(&self, inbound: &Inbound) {
        let text = serde_json::to_string(inbound).unwrap();
        self.push_raw(&text);
    }

    pub fn push_control(&self, event: ControlEvent) {
        self.push(&Inbound::Control { body: event });
    }

    pub fn push_frame(&self, stream_id: &str, sequence: u64) {
        self.push(&Inbound::Stream(StreamFrame {
            stream_id: stream_id.to_string(),
            sequence,
            event_id: Some(sequence.into()),
            body: json!({ "seq": sequence }),
        }));
    }

    /// Close the current connection from the server side
    pub fn drop_connection(&self) {
        let state = self.state.lock().unwrap();
        if let Some(connection) = &state.current {
            connection.close();
        }
    }
}

pub struct MockConnector {
    state: Arc<Mutex<ServerState>>,
}

impl Connector for MockConnector {
    fn supported_framings(&self) -> Vec<Framing> {
        all_framings()
    }

    fn open(
        &mut self,
        url: &Url,
        options: TransportOptions,
        events: TransportEvents,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let mut state = self.state.lock().unwrap();
        let attempt = state.opens.len();
        state.opens.push(OpenRecord {
            url: url.to_string(),
            framings: options.allowed_framings.clone(),
            debug: options.debug,
        });

        let host = url.host_str().unwrap_or_default().to_string();
        let refused = state.refuse_all || state.refused_hosts.contains(&host);
        let closed = Arc::new(AtomicBool::new(false));
        state.current = Some(Connection {
            events: events.clone(),
            closed: Arc::clone(&closed),
        });
        drop(state);

        let transport = MockTransport {
            connection: Connection { events, closed },
            state: Arc::clone(&self.state),
            attempt,
        };
        if refused {
            transport.connection.close();
        } else {
            transport.connection.events.opened();
        }
        Ok(Box::new(transport))
    }
}

struct MockTransport {
    connection: Connection,
    state: Arc<Mutex<ServerState>>,
    attempt: usize,
}

impl Transport for MockTransport {
    fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.connection.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let envelope: ControlEnvelope =
            serde_json::from_str(&text).map_err(|e| TransportError::Send(e.to_string()))?;

        let mut replies = {
            let mut state = self.state.lock().unwrap();
            if state.fail_sends {
                return Err(TransportError::Send("connection reset".to_string()));
            }
            state.sent.push(envelope.clone());
            match state.responder.as_mut() {
                Some(responder) => responder(&envelope.body, self.attempt),
                None => vec![],
            }
        };
        if envelope.body == ControlRequest::Disconnect {
            replies.push(Reply::Close);
        }

        for reply in replies {
            match reply {
                Reply::Control(event) => {
                    let text = serde_json::to_string(&Inbound::Control { body: event })
                        .map_err(|e| TransportError::Send(e.to_string()))?;
                    self.connection.events.message(text);
                }
                Reply::Close => self.connection.close(),
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        self.connection.close();
    }
}

/// Sink that records everything written to it
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StreamEvent>>,
    ends: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.events.lock().unwrap().iter().map(|e| e.sequence).collect()
    }

    pub fn end_count(&self) -> usize {
        self.ends.load(Ordering::SeqCst)
    }
}

impl Sink for RecordingSink {
    fn write(&self, event: &StreamEvent) -> Result<(), SinkError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn end(&self) {
        self.ends.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn client_errors(events: &[ClientEvent]) -> Vec<StreamError> {
    events
        .iter()
        .filter_map(|event| match event {
            ClientEvent::Error(error) => Some(error.clone()),
            _ => None,
        })
        .collect()
}

pub fn count_client(events: &[ClientEvent], wanted: &ClientEvent) -> usize {
    events.iter().filter(|event| *event == wanted).count()
}

pub fn subscription_errors(events: &[SubscriptionEvent]) -> Vec<StreamError> {
    events
        .iter()
        .filter_map(|event| match event {
            SubscriptionEvent::Error(error) => Some(error.clone()),
            _ => None,
        })
        .collect()
}

pub fn count_subscription(events: &[SubscriptionEvent], wanted: &SubscriptionEvent) -> usize {
    events.iter().filter(|event| *event == wanted).count()
}
