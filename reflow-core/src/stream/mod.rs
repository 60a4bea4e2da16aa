//! Push Streams
//!
//! This module implements the push-based stream primitive the rest of the
//! crate is built from. A [`Stream`] is a description of a computation: it
//! does nothing until it is subscribed, and every subscription instantiates
//! the computation afresh.
//!
//! # Concepts
//!
//! ## Events
//!
//! A subscription receives zero or more [`Event::Value`]s, optionally followed
//! by exactly one terminal event: [`Event::Failed`] or [`Event::Completed`].
//! Streams that run forever never deliver a terminal event.
//!
//! ## Subscriptions
//!
//! Subscribing returns a [`Subscription`]. Cancelling it (or dropping it)
//! stops delivery and releases upstream resources. Composite operators keep
//! their upstream handles in [`SubscriptionSlot`]s so that cancellation is
//! structural: tearing down the outermost subscription tears down whatever
//! is live underneath it.
//!
//! ## Emitters
//!
//! Producers never talk to observers directly. They receive an [`Emitter`]
//! which enforces the event contract for its subscription: nothing after a
//! terminal event, nothing after cancellation.
//!
//! # Implementation Notes
//!
//! Delivery is synchronous. An event is handed to the observer on whatever
//! thread the producer runs on, and no lock is held while an observer runs,
//! so observers are free to subscribe, cancel or emit re-entrantly.

mod bridge;
mod combine;
mod operators;
mod subject;
mod subscriber;
mod subscription;

pub use bridge::AsyncEvents;
pub use combine::{combine_latest, combine_latest3};
pub use subject::Subject;
pub use subscriber::SubscriberId;
pub use subscription::{Emitter, Subscription, SubscriptionSlot};

use std::fmt::Debug;
use std::sync::Arc;

/// Failure type of streams that cannot fail.
///
/// Being uninhabited, a `Stream<T, Never>` is statically guaranteed never to
/// deliver [`Event::Failed`].
pub type Never = std::convert::Infallible;

/// A single event delivered to an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<T, E> {
    /// A value.
    Value(T),

    /// The stream failed. Nothing follows.
    Failed(E),

    /// The stream finished. Nothing follows.
    Completed,
}

impl<T, E> Event<T, E> {
    /// Whether this event ends the subscription.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Event::Value(_))
    }

    /// The carried value, if any.
    pub fn into_value(self) -> Option<T> {
        match self {
            Event::Value(value) => Some(value),
            _ => None,
        }
    }
}

type SubscribeFn<T, E> = dyn Fn(Emitter<T, E>) -> Subscription + Send + Sync;

/// A lazily subscribed, push-based stream of `T` values that may fail with `E`.
///
/// # Type Parameters
///
/// - `T`: The value type.
/// - `E`: The failure type. Defaults to [`Never`].
///
/// # Example
///
/// ```rust,ignore
/// let doubled = Stream::<i32>::from_iter(vec![1, 2, 3]).map(|v| v * 2);
///
/// let _subscription = doubled.subscribe(|event| println!("{event:?}"));
/// // Prints Value(2), Value(4), Value(6), Completed
/// ```
pub struct Stream<T, E = Never> {
    subscribe: Arc<SubscribeFn<T, E>>,
}

impl<T, E> Stream<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Create a stream from its subscribe function.
    ///
    /// The function runs once per subscription. It receives the emitter for
    /// that subscription and returns the handle that tears it down.
    pub fn new<F>(subscribe: F) -> Self
    where
        F: Fn(Emitter<T, E>) -> Subscription + Send + Sync + 'static,
    {
        Self {
            subscribe: Arc::new(subscribe),
        }
    }

    /// A stream that completes immediately without emitting.
    pub fn empty() -> Self {
        Self::new(|down| {
            down.complete();
            Subscription::empty()
        })
    }

    /// A stream that never emits, never fails and never completes.
    pub fn never() -> Self {
        Self::new(|_| Subscription::empty())
    }

    /// Subscribe an observer.
    ///
    /// The observer may be called before this method returns if the stream
    /// produces synchronously. Dropping the returned handle cancels the
    /// subscription. Upstream resources are released as soon as a terminal
    /// event has been delivered, whether or not the handle is still held.
    pub fn subscribe<O>(&self, observer: O) -> Subscription
    where
        O: Fn(Event<T, E>) + Send + Sync + 'static,
    {
        // The producer's handle lives in a slot shared with the observer, so a
        // terminal event can release it even after the caller let go of theirs
        let upstream = Arc::new(SubscriptionSlot::new());
        let on_terminal = Arc::clone(&upstream);
        let emitter = Emitter::new(Arc::new(move |event: Event<T, E>| {
            let terminal = event.is_terminal();
            observer(event);
            if terminal {
                on_terminal.dispose();
            }
        }));
        let closer = emitter.closer();
        upstream.replace((self.subscribe)(emitter));
        Subscription::new(move || {
            closer.close();
            upstream.dispose();
        })
    }

    /// Subscribe to values only, ignoring the terminal event.
    pub fn subscribe_values<F>(&self, on_value: F) -> Subscription
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let Event::Value(value) = event {
                on_value(value);
            }
        })
    }
}

impl<T, E> Stream<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    /// A stream that emits `value` once and completes.
    pub fn just(value: T) -> Self {
        Self::new(move |down| {
            down.value(value.clone());
            down.complete();
            Subscription::empty()
        })
    }

    /// A stream that emits every item in order, then completes.
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let items: Vec<T> = items.into_iter().collect();
        Self::new(move |down| {
            for item in &items {
                if down.is_closed() {
                    break;
                }
                down.value(item.clone());
            }
            down.complete();
            Subscription::empty()
        })
    }
}

impl<T, E> Stream<T, E>
where
    T: Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// A stream that fails immediately with `error`.
    pub fn fail(error: E) -> Self {
        Self::new(move |down| {
            down.fail(error.clone());
            Subscription::empty()
        })
    }
}

impl<T, E> Clone for Stream<T, E> {
    fn clone(&self) -> Self {
        Self {
            subscribe: Arc::clone(&self.subscribe),
        }
    }
}

impl<T, E> Debug for Stream<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").finish_non_exhaustive()
    }
}
