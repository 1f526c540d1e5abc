//! # stream-protocol
//!
//! Wire model for the multiplexed stream session protocol.
//!
//! Every message the client sends is a control envelope:
//!
//! ```text
//! { "protocol": "V1", "topic": "control", "body": { "action": "...", ... } }
//! ```
//!
//! Messages from the server are either control events (`topic: "control"`)
//! or data frames for one of the multiplexed streams (`topic: "stream"`).
//!
//! ## Usage
//!
//! ```rust
//! use stream_protocol::{decode, encode, ControlRequest, Inbound, StreamPosition, StreamRequest};
//!
//! let request = ControlRequest::Subscribe(StreamRequest {
//!     hostname: "stream.example.com".into(),
//!     lf_token: None,
//!     streams: vec![StreamPosition::new("urn:example:topic=news")],
//! });
//! let text = encode(&request).unwrap();
//! assert!(text.contains("\"action\":\"subscribe\""));
//!
//! let inbound = decode(r#"{"topic":"control","body":{"action":"subscribed"}}"#).unwrap();
//! assert!(matches!(inbound, Inbound::Control { .. }));
//! ```

pub mod envelope;
pub mod error;
pub mod ids;

pub use envelope::{
    decode, encode, ControlEnvelope, ControlEvent, ControlRequest, Inbound, StreamFrame,
    StreamRequest, CONTROL_TOPIC, PROTOCOL_VERSION,
};
pub use error::{ProtocolError, ProtocolResult};
pub use ids::{Classifier, Credential, EventId, StreamPosition, StreamUrn};
