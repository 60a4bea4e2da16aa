//! Subscription handles and the emitter guard.
//!
//! # Slots
//!
//! Operators that own upstream subscriptions (switch-to-latest, retry,
//! combine-latest, the pagination state machine) never keep a bare
//! `Subscription` in a field. They keep a [`SubscriptionSlot`], a small
//! tagged state machine:
//!
//! ```text
//!   Idle ──replace──▶ Active(handle) ──replace──▶ Active(new handle)
//!    │                    │                        (old handle cancelled first)
//!    └──────dispose───────┴──────▶ Disposed (anything installed later is
//!                                            cancelled on arrival)
//! ```
//!
//! The `Disposed` state is what makes synchronous producers safe: a
//! subscription that fails or is torn down before its handle has even been
//! returned still gets cancelled the moment the handle is installed.
//!
//! # Locking
//!
//! Cancelling a subscription runs arbitrary teardown code. The slot always
//! moves the old handle out and releases its lock before dropping it.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::Event;

/// A cancellable handle to a live subscription.
///
/// Dropping the handle cancels the subscription.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Create a handle that runs `teardown` when cancelled.
    pub fn new<F>(teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    /// A handle with nothing to tear down.
    pub fn empty() -> Self {
        Self { teardown: None }
    }

    /// Cancel the subscription now.
    pub fn cancel(mut self) {
        self.run_teardown();
    }

    /// Give up the handle without cancelling.
    ///
    /// The teardown is dropped without being run. A handle returned by
    /// [`Stream::subscribe`](super::Stream::subscribe) keeps delivering until
    /// its stream terminates, and its upstream is released at that point. A
    /// stream that never terminates stays subscribed for as long as its
    /// producer holds the emitter.
    pub fn detach(mut self) {
        drop(self.teardown.take());
    }

    fn run_teardown(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_teardown();
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &self.teardown.is_some())
            .finish()
    }
}

/// State of a [`SubscriptionSlot`].
enum SlotState {
    /// Nothing installed.
    Idle,

    /// Owns one live subscription.
    Active(Subscription),

    /// Torn down for good.
    Disposed,
}

/// Owner of at most one live subscription.
///
/// See the module documentation for the state machine.
pub struct SubscriptionSlot {
    state: Mutex<SlotState>,
}

impl SubscriptionSlot {
    /// Create an idle slot.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Idle),
        }
    }

    /// Install `subscription`, cancelling whatever was active before.
    ///
    /// A disposed slot cancels `subscription` instead of keeping it.
    pub fn replace(&self, subscription: Subscription) {
        let released = {
            let mut state = self.state.lock();
            if matches!(*state, SlotState::Disposed) {
                Some(subscription)
            } else {
                match std::mem::replace(&mut *state, SlotState::Active(subscription)) {
                    SlotState::Active(previous) => Some(previous),
                    _ => None,
                }
            }
        };
        drop(released);
    }

    /// Cancel the active subscription, if any, and go back to idle.
    pub fn clear(&self) {
        let released = {
            let mut state = self.state.lock();
            if matches!(*state, SlotState::Active(_)) {
                std::mem::replace(&mut *state, SlotState::Idle)
            } else {
                SlotState::Idle
            }
        };
        drop(released);
    }

    /// Cancel the active subscription, if any, and refuse all future ones.
    pub fn dispose(&self) {
        let released = std::mem::replace(&mut *self.state.lock(), SlotState::Disposed);
        drop(released);
    }

    /// Whether a subscription is installed.
    pub fn is_active(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Active(_))
    }

    /// Whether the slot has been disposed.
    pub fn is_disposed(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Disposed)
    }
}

impl Default for SubscriptionSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for SubscriptionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match *self.state.lock() {
            SlotState::Idle => "idle",
            SlotState::Active(_) => "active",
            SlotState::Disposed => "disposed",
        };
        f.debug_struct("SubscriptionSlot").field("state", &state).finish()
    }
}

type Observer<T, E> = dyn Fn(Event<T, E>) + Send + Sync;

/// The producing side of one subscription.
///
/// Clones share the same closed flag: once any clone delivers a terminal
/// event, or the subscription is cancelled, every clone goes quiet.
pub struct Emitter<T, E> {
    observer: Arc<Observer<T, E>>,
    closed: Arc<AtomicBool>,
}

impl<T, E> Emitter<T, E> {
    pub(crate) fn new(observer: Arc<Observer<T, E>>) -> Self {
        Self {
            observer,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Deliver a value.
    pub fn value(&self, value: T) {
        if !self.is_closed() {
            (self.observer)(Event::Value(value));
        }
    }

    /// Deliver a failure and close.
    pub fn fail(&self, error: E) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            (self.observer)(Event::Failed(error));
        }
    }

    /// Deliver completion and close.
    pub fn complete(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            (self.observer)(Event::Completed);
        }
    }

    /// Deliver any event.
    pub fn send(&self, event: Event<T, E>) {
        match event {
            Event::Value(value) => self.value(value),
            Event::Failed(error) => self.fail(error),
            Event::Completed => self.complete(),
        }
    }

    /// Whether the subscription is over: terminated or cancelled.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// A handle that silences this emitter without keeping its observer alive.
    pub(crate) fn closer(&self) -> Closer {
        Closer(Arc::clone(&self.closed))
    }
}

/// Silences an [`Emitter`] from the cancelling side.
pub(crate) struct Closer(Arc<AtomicBool>);

impl Closer {
    pub(crate) fn close(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl<T, E> Clone for Emitter<T, E> {
    fn clone(&self) -> Self {
        Self {
            observer: Arc::clone(&self.observer),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<T, E> Debug for Emitter<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("closed", &self.is_closed())
            .finish()
    }
}
