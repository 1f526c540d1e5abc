//! Observable capability shared by the client and its subscriptions
//!
//! Each observable owns an [`Emitter`] and hands out its receiving end
//! exactly once through [`Observable::events`]. Consumers read from the
//! returned [`EventStream`] with `recv().await`, `try_recv()`, or as a
//! `futures::Stream`.

use crate::error::{Result, StreamError};
use futures::Stream;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;

/// Something that emits events of type `Self::Event`
pub trait Observable {
    type Event;

    /// Take the event stream for this observable.
    ///
    /// Can only be called once; later calls return
    /// [`StreamError::EventsTaken`].
    fn events(&self) -> Result<EventStream<Self::Event>>;
}

/// Receiving end of an observable's events
#[derive(Debug)]
pub struct EventStream<E> {
    rx: mpsc::UnboundedReceiver<E>,
}

impl<E> EventStream<E> {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<E>) -> Self {
        Self { rx }
    }

    /// Wait for the next event
    ///
    /// Returns `None` once the emitter is gone and the buffer is drained.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Receive an event if one is ready
    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<E> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Collect every event that is ready right now
    pub fn drain(&mut self) -> Vec<E> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl<E> Stream for EventStream<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        self.rx.poll_recv(cx)
    }
}

/// Lifecycle events kept for an observable nobody has taken the stream of
pub const EVENT_BACKLOG: usize = 64;

/// Sending half owned by an observable.
///
/// Until the stream is taken, events emitted with [`Emitter::emit`] are
/// kept in a backlog holding the most recent [`EVENT_BACKLOG`] of them.
/// High-volume events go through [`Emitter::emit_observed`] and are only
/// sent while someone holds the stream.
pub(crate) struct Emitter<E> {
    outlet: Mutex<Outlet<E>>,
}

enum Outlet<E> {
    Pending(VecDeque<E>),
    Taken(mpsc::UnboundedSender<E>),
}

impl<E> Emitter<E> {
    pub(crate) fn new() -> Self {
        Self {
            outlet: Mutex::new(Outlet::Pending(VecDeque::new())),
        }
    }

    pub(crate) fn emit(&self, event: E) {
        match &mut *self.outlet.lock() {
            Outlet::Pending(backlog) => {
                if backlog.len() == EVENT_BACKLOG {
                    backlog.pop_front();
                }
                backlog.push_back(event);
            }
            Outlet::Taken(tx) => {
                // A dropped stream just means nobody is listening.
                let _ = tx.send(event);
            }
        }
    }

    pub(crate) fn emit_observed(&self, event: E) {
        if let Outlet::Taken(tx) = &*self.outlet.lock() {
            let _ = tx.send(event);
        }
    }

    pub(crate) fn is_observed(&self) -> bool {
        matches!(&*self.outlet.lock(), Outlet::Taken(tx) if !tx.is_closed())
    }

    pub(crate) fn take(&self) -> Result<EventStream<E>> {
        let mut outlet = self.outlet.lock();
        let Outlet::Pending(backlog) = &mut *outlet else {
            return Err(StreamError::EventsTaken);
        };

        let (tx, rx) = mpsc::unbounded_channel();
        for event in backlog.drain(..) {
            let _ = tx.send(event);
        }
        *outlet = Outlet::Taken(tx);
        Ok(EventStream::new(rx))
    }
}
