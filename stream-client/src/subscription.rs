//! Subscription handle and the events it emits
//!
//! A [`Subscription`] is a cheap, clonable handle to one logical stream.
//! The session owns the registration and the sequencer; the handle owns
//! the consumption side: attached sinks, the pause buffer, and the
//! subscription's event stream.

use crate::error::{Result, StreamError};
use crate::observable::{Emitter, EventStream, Observable};
use crate::session::Command;
use crate::sink::{PipeOptions, Pipeline, Sink};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use stream_protocol::{EventId, StreamFrame, StreamUrn};
use tokio::sync::mpsc;

/// One in-order event delivered to consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamEvent {
    pub stream_id: String,
    pub sequence: u64,
    pub event_id: Option<EventId>,
    pub body: Value,
}

impl From<StreamFrame> for StreamEvent {
    fn from(frame: StreamFrame) -> Self {
        Self {
            stream_id: frame.stream_id,
            sequence: frame.sequence,
            event_id: frame.event_id,
            body: frame.body,
        }
    }
}

/// Lifecycle and data notifications for one subscription
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// The server acknowledged the subscription on the current connection
    Start,
    /// Only emitted while the event stream is held
    Data(StreamEvent),
    Error(StreamError),
    End,
    Close,
}

struct Shared {
    urn: StreamUrn,
    key: String,
    pipeline: Mutex<Pipeline>,
    events: Emitter<SubscriptionEvent>,
    commands: mpsc::UnboundedSender<Command>,
    closed: AtomicBool,
}

/// Handle to a subscribed stream.
///
/// Obtained from [`StreamClient::subscribe`](crate::StreamClient::subscribe).
/// Subscribing twice to the same stream returns handles to the same
/// subscription.
///
/// # Example
///
/// ```rust,ignore
/// let subscription = client.subscribe("urn:example:topic=news").await?;
/// let (sink, mut events) = ChannelSink::new();
/// subscription.pipe(&sink);
///
/// while let Some(event) = events.recv().await {
///     println!("{} #{}: {}", event.stream_id, event.sequence, event.body);
/// }
/// ```
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<Shared>,
}

impl Subscription {
    pub(crate) fn new(urn: StreamUrn, commands: mpsc::UnboundedSender<Command>) -> Self {
        let key = urn.normalized();
        Self {
            inner: Arc::new(Shared {
                urn,
                key,
                pipeline: Mutex::new(Pipeline::default()),
                events: Emitter::new(),
                commands,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// The URN this subscription was created with
    pub fn urn(&self) -> &StreamUrn {
        &self.inner.urn
    }

    /// Registry key: the URN without its classifier
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Whether both handles refer to the same subscription
    pub fn same_as(&self, other: &Subscription) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Attach `sink` with default [`PipeOptions`]
    pub fn pipe<S: Sink + 'static>(&self, sink: &Arc<S>) {
        self.pipe_with(sink, PipeOptions::default());
    }

    /// Attach `sink`. Piping the same sink again only updates its options.
    ///
    /// The subscription keeps a weak reference; the caller keeps the sink
    /// alive.
    pub fn pipe_with<S: Sink + 'static>(&self, sink: &Arc<S>, options: PipeOptions) {
        let sink: Arc<dyn Sink> = sink.clone();
        self.inner
            .pipeline
            .lock()
            .attach(Arc::downgrade(&sink), options);
    }

    /// Detach one sink.
    ///
    /// Returns [`StreamError::SinkNotRegistered`] if `sink` is not attached.
    pub fn unpipe<S: Sink + 'static>(&self, sink: &Arc<S>) -> Result<()> {
        let addr = Arc::as_ptr(sink) as *const ();
        if self.inner.pipeline.lock().detach(addr) {
            Ok(())
        } else {
            Err(StreamError::SinkNotRegistered)
        }
    }

    pub fn unpipe_all(&self) {
        self.inner.pipeline.lock().detach_all();
    }

    /// Number of live attached sinks
    pub fn sink_count(&self) -> usize {
        self.inner.pipeline.lock().sink_count()
    }

    /// Buffer deliveries until [`resume`](Self::resume)
    pub fn pause(&self) {
        self.inner.pipeline.lock().pause();
    }

    /// Flush buffered deliveries in arrival order, then deliver live
    pub fn resume(&self) {
        self.inner.pipeline.lock().resume();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.pipeline.lock().is_paused()
    }

    /// Unsubscribe.
    ///
    /// The subscription emits `End` then `Close` once the client has
    /// processed the request. If it was the last subscription the client
    /// disconnects. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.inner
            .commands
            .send(Command::Close {
                key: self.inner.key.clone(),
            })
            .map_err(|_| StreamError::ClientClosed)
    }

    pub(crate) fn emit(&self, event: SubscriptionEvent) {
        self.inner.events.emit(event);
    }

    pub(crate) fn deliver(&self, event: StreamEvent) {
        self.inner
            .events
            .emit_observed(SubscriptionEvent::Data(event.clone()));
        self.inner.pipeline.lock().write(event);
    }

    /// Terminal notifications: `End` to listeners and sinks, then `Close`
    pub(crate) fn finish(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.events.emit(SubscriptionEvent::End);
        self.inner.pipeline.lock().end();
        self.inner.events.emit(SubscriptionEvent::Close);
    }
}

impl Observable for Subscription {
    type Event = SubscriptionEvent;

    fn events(&self) -> Result<EventStream<SubscriptionEvent>> {
        self.inner.events.take()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("urn", &self.inner.urn)
            .field("closed", &self.is_closed())
            .finish()
    }
}
