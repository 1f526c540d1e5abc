//! # stream-client
//!
//! Client for a multiplexed, resumable event-stream service.
//!
//! One physical connection carries any number of logical streams. The
//! client forms the connection when the first stream is subscribed and
//! drops it when the last one closes. Lost connections are retried with
//! quadratic backoff, the server may move the session to another host,
//! and gaps in a stream are repaired by asking the server to rewind.
//!
//! ## Architecture
//!
//! - [`StreamClient`]: handle used to authenticate and subscribe
//! - [`Subscription`]: per-stream consumption API (`pipe`, `pause`, `resume`, `close`)
//! - [`Sequencer`]: in-order, gap-free delivery for one stream
//! - [`Connector`] / [`Transport`]: the socket, supplied by the application
//!
//! ## Example
//!
//! ```rust,ignore
//! use stream_client::{ClientConfig, ChannelSink, Observable, StreamClient};
//!
//! let client = StreamClient::new(ClientConfig::new("stream.example.com"), connector)?;
//! client.auth("someBase64EncodedToken")?;
//!
//! let news = client.subscribe("urn:example:topic=news:topicStream").await?;
//! let (sink, mut received) = ChannelSink::new();
//! news.pipe(&sink);
//!
//! let mut client_events = client.events()?;
//! tokio::spawn(async move {
//!     while let Some(event) = client_events.recv().await {
//!         tracing::info!(?event, "client event");
//!     }
//! });
//!
//! while let Some(event) = received.recv().await {
//!     println!("#{} {}", event.sequence, event.body);
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod observable;
pub mod retry;
pub mod sequencer;
pub mod sink;
pub mod state;
pub mod subscription;
pub mod transport;

mod registry;
mod session;

pub use client::{ClientEvent, StreamClient};
pub use config::{ClientConfig, Environment, Scheme};
pub use error::{ErrorKind, Result, StreamError, TransportError};
pub use observable::{EventStream, Observable, EVENT_BACKLOG};
pub use retry::RetryPolicy;
pub use sequencer::{Ingest, Sequencer};
pub use sink::{ChannelSink, PipeOptions, Sink, SinkError};
pub use state::{ConnectionState, StateChange};
pub use subscription::{StreamEvent, Subscription, SubscriptionEvent};
pub use transport::{
    ConnectionId, Connector, Framing, Transport, TransportEvent, TransportEvents,
    TransportOptions,
};

pub use stream_protocol::{Credential, EventId, StreamPosition, StreamUrn};
