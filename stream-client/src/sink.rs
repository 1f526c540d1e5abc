//! Consumption pipeline: sinks, pipe options, and pause buffering
//!
//! A subscription delivers each in-order event to every attached
//! [`Sink`]. Sinks are held weakly; dropping the last `Arc` to a sink
//! detaches it on the next delivery.

use crate::observable::EventStream;
use crate::subscription::StreamEvent;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

/// Errors a sink may report for a single write
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The sink no longer accepts events
    #[error("Sink closed")]
    Closed,

    /// The sink refused this event
    #[error("Sink rejected event: {0}")]
    Rejected(String),
}

/// Destination for a subscription's events.
///
/// Both methods are called while the subscription's pipeline is locked,
/// so implementations must not call back into the same subscription.
pub trait Sink: Send + Sync {
    /// Receive one in-order event
    fn write(&self, event: &StreamEvent) -> Result<(), SinkError>;

    /// The subscription has ended; no more writes will follow
    fn end(&self) {}
}

/// Options for [`Subscription::pipe_with`](crate::Subscription::pipe_with)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeOptions {
    /// Forward the end notification to the sink
    /// Default: true
    pub end: bool,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self { end: true }
    }
}

/// Sink that forwards events into an [`EventStream`]
///
/// The stream finishes once the subscription ends.
pub struct ChannelSink {
    tx: Mutex<Option<mpsc::UnboundedSender<StreamEvent>>>,
}

impl ChannelSink {
    pub fn new() -> (Arc<Self>, EventStream<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(Self {
            tx: Mutex::new(Some(tx)),
        });
        (sink, EventStream::new(rx))
    }
}

impl Sink for ChannelSink {
    fn write(&self, event: &StreamEvent) -> Result<(), SinkError> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(SinkError::Closed)?;
        tx.send(event.clone()).map_err(|_| SinkError::Closed)
    }

    fn end(&self) {
        self.tx.lock().take();
    }
}

struct Pipe {
    sink: Weak<dyn Sink>,
    end: bool,
}

impl Pipe {
    fn addr(&self) -> *const () {
        self.sink.as_ptr() as *const ()
    }
}

enum PipeItem {
    Data(StreamEvent),
    End,
}

/// Attached sinks plus the FIFO buffer used while paused
#[derive(Default)]
pub(crate) struct Pipeline {
    pipes: Vec<Pipe>,
    paused: bool,
    buffer: VecDeque<PipeItem>,
}

impl Pipeline {
    pub(crate) fn attach(&mut self, sink: Weak<dyn Sink>, options: PipeOptions) {
        let addr = sink.as_ptr() as *const ();
        match self.pipes.iter_mut().find(|pipe| pipe.addr() == addr) {
            Some(pipe) => pipe.end = options.end,
            None => self.pipes.push(Pipe {
                sink,
                end: options.end,
            }),
        }
    }

    /// Detach the sink at `addr`, returning whether it was attached
    pub(crate) fn detach(&mut self, addr: *const ()) -> bool {
        let before = self.pipes.len();
        self.pipes.retain(|pipe| pipe.addr() != addr);
        self.pipes.len() != before
    }

    pub(crate) fn detach_all(&mut self) {
        self.pipes.clear();
    }

    pub(crate) fn sink_count(&self) -> usize {
        self.pipes
            .iter()
            .filter(|pipe| pipe.sink.strong_count() > 0)
            .count()
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused
    }

    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub(crate) fn pause(&mut self) {
        self.paused = true;
    }

    pub(crate) fn resume(&mut self) {
        if !self.paused {
            return;
        }
        self.paused = false;
        while let Some(item) = self.buffer.pop_front() {
            self.dispatch(&item);
        }
    }

    pub(crate) fn write(&mut self, event: StreamEvent) {
        self.push(PipeItem::Data(event));
    }

    /// Queue the end notification behind anything still buffered
    pub(crate) fn end(&mut self) {
        self.push(PipeItem::End);
    }

    fn push(&mut self, item: PipeItem) {
        if self.paused {
            self.buffer.push_back(item);
        } else {
            self.dispatch(&item);
        }
    }

    fn dispatch(&mut self, item: &PipeItem) {
        self.pipes.retain(|pipe| pipe.sink.strong_count() > 0);
        for pipe in &self.pipes {
            let Some(sink) = pipe.sink.upgrade() else {
                continue;
            };
            match item {
                PipeItem::Data(event) => {
                    if let Err(error) = sink.write(event) {
                        tracing::error!(
                            stream_id = %event.stream_id,
                            sequence = event.sequence,
                            %error,
                            "Sink failed to accept event"
                        );
                    }
                }
                PipeItem::End if pipe.end => sink.end(),
                PipeItem::End => {}
            }
        }
    }
}
