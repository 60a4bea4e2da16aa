//! Generic stream operators.
//!
//! Each operator returns a new [`Stream`] and does no work until that stream
//! is subscribed. Per-subscription state lives inside the subscribe closure,
//! never in the returned stream, so one operator chain can be subscribed any
//! number of times.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{Emitter, Event, Never, Stream, Subscription, SubscriptionSlot};
use crate::retry::RetryPolicy;

impl<T, E> Stream<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Transform every value.
    pub fn map<U, F>(&self, transform: F) -> Stream<U, E>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let transform = Arc::new(transform);
        Stream::new(move |down: Emitter<U, E>| {
            let transform = Arc::clone(&transform);
            upstream.subscribe(move |event| match event {
                Event::Value(value) => down.value(transform(value)),
                Event::Failed(error) => down.fail(error),
                Event::Completed => down.complete(),
            })
        })
    }

    /// Transform the failure.
    pub fn map_error<F2, F>(&self, transform: F) -> Stream<T, F2>
    where
        F2: Send + 'static,
        F: Fn(E) -> F2 + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let transform = Arc::new(transform);
        Stream::new(move |down: Emitter<T, F2>| {
            let transform = Arc::clone(&transform);
            upstream.subscribe(move |event| match event {
                Event::Value(value) => down.value(value),
                Event::Failed(error) => down.fail(transform(error)),
                Event::Completed => down.complete(),
            })
        })
    }

    /// Keep only the values matching `predicate`.
    pub fn filter<P>(&self, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let predicate = Arc::new(predicate);
        Stream::new(move |down: Emitter<T, E>| {
            let predicate = Arc::clone(&predicate);
            upstream.subscribe(move |event| match event {
                Event::Value(value) => {
                    if predicate(&value) {
                        down.value(value);
                    }
                }
                other => down.send(other),
            })
        })
    }

    /// Emit a running fold of the values, starting from `seed`.
    ///
    /// Every subscription starts again from `seed`.
    pub fn scan<A, F>(&self, seed: A, fold: F) -> Stream<A, E>
    where
        A: Clone + Send + Sync + 'static,
        F: Fn(&A, T) -> A + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let fold = Arc::new(fold);
        Stream::new(move |down: Emitter<A, E>| {
            let fold = Arc::clone(&fold);
            let accumulator = Mutex::new(seed.clone());
            upstream.subscribe(move |event| match event {
                Event::Value(value) => {
                    let next = {
                        let mut accumulator = accumulator.lock();
                        let next = fold(&*accumulator, value);
                        *accumulator = next.clone();
                        next
                    };
                    down.value(next);
                }
                Event::Failed(error) => down.fail(error),
                Event::Completed => down.complete(),
            })
        })
    }

    /// Switch to a recovery stream when this stream fails.
    pub fn catch_error<F2, F>(&self, recover: F) -> Stream<T, F2>
    where
        F2: Send + 'static,
        F: Fn(E) -> Stream<T, F2> + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let recover = Arc::new(recover);
        Stream::new(move |down: Emitter<T, F2>| {
            let recovery = Arc::new(SubscriptionSlot::new());
            let subscription = {
                let recover = Arc::clone(&recover);
                let recovery = Arc::clone(&recovery);
                upstream.subscribe(move |event| match event {
                    Event::Value(value) => down.value(value),
                    Event::Completed => down.complete(),
                    Event::Failed(error) => {
                        let down = down.clone();
                        let fallback = recover(error).subscribe(move |event| down.send(event));
                        recovery.replace(fallback);
                    }
                })
            };
            Subscription::new(move || {
                drop(subscription);
                recovery.dispose();
            })
        })
    }

    /// Run `hook` every time the stream is subscribed, before subscribing upstream.
    pub fn on_subscribe<H>(&self, hook: H) -> Self
    where
        H: Fn() + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let hook = Arc::new(hook);
        Stream::new(move |down: Emitter<T, E>| {
            hook();
            upstream.subscribe(move |event| down.send(event))
        })
    }

    /// Run `hook` when a subscription is cancelled before it terminated.
    pub fn on_cancel<H>(&self, hook: H) -> Self
    where
        H: Fn() + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let hook = Arc::new(hook);
        Stream::new(move |down: Emitter<T, E>| {
            let terminated = Arc::new(AtomicBool::new(false));
            let subscription = {
                let terminated = Arc::clone(&terminated);
                upstream.subscribe(move |event| {
                    if event.is_terminal() {
                        terminated.store(true, Ordering::SeqCst);
                    }
                    down.send(event);
                })
            };
            let hook = Arc::clone(&hook);
            Subscription::new(move || {
                drop(subscription);
                if !terminated.load(Ordering::SeqCst) {
                    hook();
                }
            })
        })
    }

    /// Forward the first value, then complete and cancel upstream.
    pub fn take_first(&self) -> Self {
        let upstream = self.clone();
        Stream::new(move |down: Emitter<T, E>| {
            let slot = Arc::new(SubscriptionSlot::new());
            let subscription = {
                let slot = Arc::clone(&slot);
                upstream.subscribe(move |event| match event {
                    Event::Value(value) => {
                        down.value(value);
                        down.complete();
                        slot.dispose();
                    }
                    other => down.send(other),
                })
            };
            slot.replace(subscription);
            Subscription::new(move || slot.dispose())
        })
    }

    /// Resubscribe after failures, as long as `policy` allows.
    ///
    /// Once the policy is exhausted the last failure is forwarded. Upstreams
    /// that fail synchronously are resubscribed in a loop rather than
    /// recursively, so an unbounded policy on such an upstream spins instead
    /// of overflowing the stack.
    pub fn retry(&self, policy: RetryPolicy) -> Self {
        let upstream = self.clone();
        Stream::new(move |down: Emitter<T, E>| {
            let state = Arc::new(RetryState {
                upstream: upstream.clone(),
                policy,
                current: SubscriptionSlot::new(),
                failures: AtomicUsize::new(0),
                attempting: AtomicBool::new(false),
                pending: AtomicBool::new(false),
            });
            state.attempt(&down);
            Subscription::new(move || state.current.dispose())
        })
    }

    /// Emit `value` on subscription, then everything upstream emits.
    pub fn prepend(&self, value: T) -> Self
    where
        T: Clone + Sync,
    {
        let upstream = self.clone();
        Stream::new(move |down: Emitter<T, E>| {
            down.value(value.clone());
            if down.is_closed() {
                return Subscription::empty();
            }
            upstream.subscribe(move |event| down.send(event))
        })
    }

    /// On failure, emit `value` and complete instead.
    pub fn replace_error(&self, value: T) -> Self
    where
        T: Clone + Sync,
    {
        let upstream = self.clone();
        Stream::new(move |down: Emitter<T, E>| {
            let value = value.clone();
            upstream.subscribe(move |event| match event {
                Event::Failed(_) => {
                    down.value(value.clone());
                    down.complete();
                }
                other => down.send(other),
            })
        })
    }

    /// Map every value to a stream and follow only the most recent one.
    pub fn flat_map_latest<U, F>(&self, transform: F) -> Stream<U, E>
    where
        U: Send + 'static,
        F: Fn(T) -> Stream<U, E> + Send + Sync + 'static,
    {
        self.map(transform).switch_to_latest()
    }
}

impl<T> Stream<T, Never>
where
    T: Send + 'static,
{
    /// Widen the failure type of a stream that cannot fail.
    pub fn set_failure_type<E>(&self) -> Stream<T, E>
    where
        E: Send + 'static,
    {
        let upstream = self.clone();
        Stream::new(move |down: Emitter<T, E>| {
            upstream.subscribe(move |event| match event {
                Event::Value(value) => down.value(value),
                Event::Failed(never) => match never {},
                Event::Completed => down.complete(),
            })
        })
    }
}

struct RetryState<T, E> {
    upstream: Stream<T, E>,
    policy: RetryPolicy,
    current: SubscriptionSlot,
    failures: AtomicUsize,
    attempting: AtomicBool,
    pending: AtomicBool,
}

impl<T, E> RetryState<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn attempt(self: &Arc<Self>, down: &Emitter<T, E>) {
        loop {
            if down.is_closed() {
                return;
            }
            self.pending.store(false, Ordering::SeqCst);
            self.attempting.store(true, Ordering::SeqCst);
            let subscription = {
                let state = Arc::clone(self);
                let down = down.clone();
                self.upstream.subscribe(move |event| match event {
                    Event::Value(value) => down.value(value),
                    Event::Completed => down.complete(),
                    Event::Failed(error) => state.on_failure(error, &down),
                })
            };
            self.current.replace(subscription);
            self.attempting.store(false, Ordering::SeqCst);
            if !self.pending.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    fn on_failure(self: &Arc<Self>, error: E, down: &Emitter<T, E>) {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if down.is_closed() || !self.policy.allows(failures) {
            debug!(failures, "retry policy exhausted, forwarding failure");
            down.fail(error);
            return;
        }
        trace!(failures, "resubscribing after failure");
        if self.attempting.load(Ordering::SeqCst) {
            self.pending.store(true, Ordering::SeqCst);
        } else {
            self.attempt(down);
        }
    }
}

impl<T, E> Stream<Stream<T, E>, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Follow the most recently emitted inner stream.
    ///
    /// Exactly one inner subscription is live at a time. A new inner stream
    /// cancels the previous one before it is itself subscribed, so two inner
    /// streams never forward concurrently. An inner failure terminates the
    /// whole stream. Completion happens once the outer stream and the current
    /// inner stream have both completed.
    pub fn switch_to_latest(&self) -> Stream<T, E> {
        let outer = self.clone();
        Stream::new(move |down: Emitter<T, E>| {
            let state = Arc::new(SwitchState::new());
            let subscription = {
                let state = Arc::clone(&state);
                let down = down.clone();
                outer.subscribe(move |event| match event {
                    Event::Value(inner) => state.switch_to(inner, &down),
                    Event::Failed(error) => {
                        state.inner.dispose();
                        down.fail(error);
                    }
                    Event::Completed => {
                        state.outer_done.store(true, Ordering::SeqCst);
                        if !state.inner_active.load(Ordering::SeqCst) {
                            down.complete();
                        }
                    }
                })
            };
            state.outer.replace(subscription);
            Subscription::new(move || {
                state.outer.dispose();
                state.inner.dispose();
            })
        })
    }
}

struct SwitchState {
    generation: AtomicU64,
    inner_active: AtomicBool,
    outer_done: AtomicBool,
    outer: SubscriptionSlot,
    inner: SubscriptionSlot,
}

impl SwitchState {
    fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            inner_active: AtomicBool::new(false),
            outer_done: AtomicBool::new(false),
            outer: SubscriptionSlot::new(),
            inner: SubscriptionSlot::new(),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn switch_to<T, E>(self: &Arc<Self>, inner: Stream<T, E>, down: &Emitter<T, E>)
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        if down.is_closed() {
            return;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner_active.store(true, Ordering::SeqCst);
        self.inner.clear();
        trace!(generation, "switching to new inner stream");

        let subscription = {
            let state = Arc::clone(self);
            let down = down.clone();
            inner.subscribe(move |event| {
                if !state.is_current(generation) {
                    return;
                }
                match event {
                    Event::Value(value) => down.value(value),
                    Event::Failed(error) => {
                        down.fail(error);
                        state.outer.dispose();
                        state.inner.dispose();
                    }
                    Event::Completed => {
                        state.inner_active.store(false, Ordering::SeqCst);
                        if state.outer_done.load(Ordering::SeqCst) {
                            down.complete();
                        }
                    }
                }
            })
        };

        // Superseded or already finished inner streams are dropped here.
        if self.is_current(generation) && self.inner_active.load(Ordering::SeqCst) {
            self.inner.replace(subscription);
        }
    }
}
