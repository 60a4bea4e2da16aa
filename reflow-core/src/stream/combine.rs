//! Combine-latest for two and three inputs.
//!
//! These are the base cases the N-way accumulation in
//! [`crate::algebra::accumulate_latest_many`] reduces to, so no
//! combine-latest node ever has more than three inputs.
//!
//! Semantics for both arities:
//!
//! - nothing is emitted until every input has emitted at least once,
//! - after that, every value from any input emits one snapshot of the
//!   latest values,
//! - the first failure from any input fails the result and cancels every
//!   input,
//! - the result completes once every input has completed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::{Emitter, Event, Stream, Subscription, SubscriptionSlot};

/// Latest values seen so far, one optional slot per input.
trait Latest: Send + 'static {
    type Snapshot: Send + 'static;

    /// A snapshot, once every input has a value.
    fn snapshot(&self) -> Option<Self::Snapshot>;
}

struct Pair<A, B> {
    a: Option<A>,
    b: Option<B>,
}

impl<A, B> Latest for Pair<A, B>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
{
    type Snapshot = (A, B);

    fn snapshot(&self) -> Option<(A, B)> {
        Some((self.a.clone()?, self.b.clone()?))
    }
}

struct Triple<A, B, C> {
    a: Option<A>,
    b: Option<B>,
    c: Option<C>,
}

impl<A, B, C> Latest for Triple<A, B, C>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
{
    type Snapshot = (A, B, C);

    fn snapshot(&self) -> Option<(A, B, C)> {
        Some((self.a.clone()?, self.b.clone()?, self.c.clone()?))
    }
}

/// Per-subscription state shared by the input observers.
struct Combined<S> {
    latest: Mutex<S>,
    completed: AtomicUsize,
    inputs: SmallVec<[SubscriptionSlot; 3]>,
}

impl<S: Latest> Combined<S> {
    fn new(latest: S, arity: usize) -> Arc<Self> {
        Arc::new(Self {
            latest: Mutex::new(latest),
            completed: AtomicUsize::new(0),
            inputs: (0..arity).map(|_| SubscriptionSlot::new()).collect(),
        })
    }

    fn dispose(&self) {
        for input in &self.inputs {
            input.dispose();
        }
    }

    /// Subscribe input `index`, storing its values with `store`.
    fn attach<V, E, F>(
        self: &Arc<Self>,
        index: usize,
        source: &Stream<V, E>,
        down: &Emitter<S::Snapshot, E>,
        store: F,
    ) where
        V: Send + 'static,
        E: Send + 'static,
        F: Fn(&mut S, V) + Send + Sync + 'static,
    {
        if down.is_closed() {
            return;
        }
        let subscription = {
            let combined = Arc::clone(self);
            let down = down.clone();
            source.subscribe(move |event| match event {
                Event::Value(value) => {
                    let snapshot = {
                        let mut latest = combined.latest.lock();
                        store(&mut *latest, value);
                        latest.snapshot()
                    };
                    if let Some(snapshot) = snapshot {
                        down.value(snapshot);
                    }
                }
                Event::Failed(error) => {
                    down.fail(error);
                    combined.dispose();
                }
                Event::Completed => {
                    let completed = combined.completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if completed == combined.inputs.len() {
                        down.complete();
                    }
                }
            })
        };
        self.inputs[index].replace(subscription);
    }

    fn teardown(self: Arc<Self>) -> Subscription {
        Subscription::new(move || self.dispose())
    }
}

/// Combine the latest values of two streams.
pub fn combine_latest<A, B, E>(a: &Stream<A, E>, b: &Stream<B, E>) -> Stream<(A, B), E>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    E: Send + 'static,
{
    let (a, b) = (a.clone(), b.clone());
    Stream::new(move |down: Emitter<(A, B), E>| {
        let combined = Combined::new(Pair { a: None, b: None }, 2);
        combined.attach(0, &a, &down, |latest: &mut Pair<A, B>, value| latest.a = Some(value));
        combined.attach(1, &b, &down, |latest: &mut Pair<A, B>, value| latest.b = Some(value));
        combined.teardown()
    })
}

/// Combine the latest values of three streams.
pub fn combine_latest3<A, B, C, E>(
    a: &Stream<A, E>,
    b: &Stream<B, E>,
    c: &Stream<C, E>,
) -> Stream<(A, B, C), E>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
    E: Send + 'static,
{
    let (a, b, c) = (a.clone(), b.clone(), c.clone());
    Stream::new(move |down: Emitter<(A, B, C), E>| {
        let combined = Combined::new(
            Triple {
                a: None,
                b: None,
                c: None,
            },
            3,
        );
        combined.attach(0, &a, &down, |latest: &mut Triple<A, B, C>, value| {
            latest.a = Some(value)
        });
        combined.attach(1, &b, &down, |latest: &mut Triple<A, B, C>, value| {
            latest.b = Some(value)
        });
        combined.attach(2, &c, &down, |latest: &mut Triple<A, B, C>, value| {
            latest.c = Some(value)
        });
        combined.teardown()
    })
}

impl<T, E> Stream<T, E>
where
    T: Clone + Send + 'static,
    E: Send + 'static,
{
    /// Combine the latest values of this stream and `other`.
    pub fn combine_latest<U>(&self, other: &Stream<U, E>) -> Stream<(T, U), E>
    where
        U: Clone + Send + 'static,
    {
        combine_latest(self, other)
    }
}
