//! Control and data envelopes
//!
//! Outbound traffic is always wrapped in a [`ControlEnvelope`]. Inbound
//! traffic is discriminated on `topic` and, for control events, on `action`.

use crate::error::{ProtocolError, ProtocolResult};
use crate::ids::{Credential, EventId, StreamPosition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version stamped on every outbound envelope
pub const PROTOCOL_VERSION: &str = "V1";

/// Topic of every outbound envelope
pub const CONTROL_TOPIC: &str = "control";

/// Outbound envelope: `{ protocol, topic, body }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEnvelope {
    pub protocol: String,
    pub topic: String,
    pub body: ControlRequest,
}

impl ControlEnvelope {
    pub fn new(body: ControlRequest) -> Self {
        Self {
            protocol: PROTOCOL_VERSION.to_string(),
            topic: CONTROL_TOPIC.to_string(),
            body,
        }
    }
}

/// Control actions the client sends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlRequest {
    /// Aggregate subscribe listing every registered stream
    Subscribe(StreamRequest),
    /// Replay request for streams that observed a gap
    Rewind(StreamRequest),
    Disconnect,
}

impl ControlRequest {
    pub fn action(&self) -> &'static str {
        match self {
            ControlRequest::Subscribe(_) => "subscribe",
            ControlRequest::Rewind(_) => "rewind",
            ControlRequest::Disconnect => "disconnect",
        }
    }

    /// The stream positions carried by a subscribe or rewind
    pub fn streams(&self) -> &[StreamPosition] {
        match self {
            ControlRequest::Subscribe(request) | ControlRequest::Rewind(request) => {
                &request.streams
            }
            ControlRequest::Disconnect => &[],
        }
    }
}

/// Payload shared by `subscribe` and `rewind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    /// Host the client believes it is talking to
    pub hostname: String,
    #[serde(default)]
    pub lf_token: Option<Credential>,
    pub streams: Vec<StreamPosition>,
}

/// Any message received from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "lowercase")]
pub enum Inbound {
    Control { body: ControlEvent },
    Stream(StreamFrame),
}

/// Control actions the server sends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlEvent {
    /// Subscription acknowledged, for one stream or for the whole request
    Subscribed {
        #[serde(rename = "streamId", default, skip_serializing_if = "Option::is_none")]
        stream_id: Option<String>,
    },
    /// Move the whole session to another host
    Rebalance { hostname: String },
    RewindFailed {
        #[serde(rename = "streamId")]
        stream_id: String,
        #[serde(default)]
        error: Option<String>,
    },
    AuthFailed {
        #[serde(rename = "streamId")]
        stream_id: String,
        #[serde(default)]
        error: Option<String>,
    },
    /// Session-fatal server error
    Error {
        #[serde(default)]
        error: Option<String>,
    },
    /// Any action this client does not act on
    #[serde(other)]
    Unknown,
}

/// One sequenced event on a multiplexed stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFrame {
    pub stream_id: String,
    pub sequence: u64,
    #[serde(default)]
    pub event_id: Option<EventId>,
    #[serde(default)]
    pub body: Value,
}

/// Serialize a control request inside a versioned envelope
pub fn encode(request: &ControlRequest) -> ProtocolResult<String> {
    serde_json::to_string(&ControlEnvelope::new(request.clone()))
        .map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Parse a raw text frame received from the transport
pub fn decode(text: &str) -> ProtocolResult<Inbound> {
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
}
