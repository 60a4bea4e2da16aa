//! Bridge from push streams to `futures` streams.
//!
//! Consumers running on a tokio runtime usually want to `.await` values
//! rather than register callbacks. [`Stream::into_async`] subscribes once
//! and buffers events in an unbounded channel; the returned
//! [`AsyncEvents`] yields `Ok(value)` per value, `Err(error)` for a failure,
//! and ends after the terminal event.

use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::trace;

use super::{Event, Stream, Subscription};

/// Pollable view of a subscription.
///
/// Dropping it cancels the underlying subscription.
pub struct AsyncEvents<T, E> {
    receiver: UnboundedReceiver<Result<T, E>>,
    _subscription: Subscription,
}

impl<T, E> Stream<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Subscribe and expose the events as a `futures_util::Stream`.
    pub fn into_async(&self) -> AsyncEvents<T, E> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let sender = Mutex::new(Some(sender));
        let subscription = self.subscribe(move |event| {
            let mut sender = sender.lock();
            let delivered = match event {
                Event::Value(value) => sender.as_ref().map(|tx| tx.send(Ok(value)).is_ok()),
                Event::Failed(error) => sender.take().map(|tx| tx.send(Err(error)).is_ok()),
                Event::Completed => sender.take().map(|_| true),
            };
            if delivered == Some(false) {
                trace!("async receiver dropped, event discarded");
            }
        });
        AsyncEvents {
            receiver,
            _subscription: subscription,
        }
    }
}

// Nothing is structurally pinned.
impl<T, E> Unpin for AsyncEvents<T, E> {}

impl<T, E> futures_util::Stream for AsyncEvents<T, E> {
    type Item = Result<T, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
