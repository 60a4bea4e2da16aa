//! Signal-driven stream combinators.
//!
//! These four combinators are the bridge between [`Signal`]s and ordinary
//! streams:
//!
//! - [`wait_until`] defers subscribing a stream until a signal first ticks.
//! - [`publish_on_signal`] rebuilds a stream on every tick and follows the
//!   newest one.
//! - [`publish_and_repeat_on_signal`] does the same with one eager build on
//!   subscription.
//! - [`accumulate_latest_many`] fans N streams into one stream of snapshots.
//!
//! # How Accumulation Works
//!
//! Native combine-latest nodes only exist for two and three inputs. Larger
//! inputs are split in half, each half is accumulated recursively and the two
//! half-results are combined pairwise:
//!
//! ```text
//!   [a b c d e]  ──split──▶  [a b] + [c d e]
//!                             │        │
//!                        combine2  combine3
//!                              \      /
//!                              combine2 ──map(concat)──▶ [a b c d e]
//! ```
//!
//! The graph depth grows with `log n` instead of `n`, and no node has more
//! than three inputs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::stream::{
    combine_latest, combine_latest3, Emitter, Never, Stream, Subscription, SubscriptionSlot,
};
use crate::trigger::Signal;

/// Per-subscription state of [`wait_until`].
struct Gate {
    fired: AtomicBool,
    signal: SubscriptionSlot,
    source: SubscriptionSlot,
}

impl Gate {
    fn dispose(&self) {
        self.signal.dispose();
        self.source.dispose();
    }
}

/// Subscribe `stream` only once `signal` ticks, then forward it unchanged.
///
/// Nothing is buffered: `stream` is not subscribed at all before the first
/// tick, and the signal subscription is cancelled as soon as it fires. If the
/// signal never ticks, the result never emits and never terminates. Any
/// failure-free stream can act as the signal; its values are ignored.
pub fn wait_until<T, E, S>(stream: &Stream<T, E>, signal: &Stream<S, Never>) -> Stream<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
    S: Send + 'static,
{
    let (stream, signal) = (stream.clone(), signal.clone());
    Stream::new(move |down: Emitter<T, E>| {
        let gate = Arc::new(Gate {
            fired: AtomicBool::new(false),
            signal: SubscriptionSlot::new(),
            source: SubscriptionSlot::new(),
        });

        let ticks = {
            let gate = Arc::clone(&gate);
            let stream = stream.clone();
            signal.subscribe(move |_| {
                if gate.fired.swap(true, Ordering::SeqCst) {
                    return;
                }
                gate.signal.dispose();
                trace!("gate opened");

                let down = down.clone();
                let subscription = stream.subscribe(move |event| down.send(event));
                gate.source.replace(subscription);
            })
        };
        gate.signal.replace(ticks);

        Subscription::new(move || gate.dispose())
    })
}

/// Build a fresh stream with `factory` on every tick and follow the newest.
///
/// The previous inner stream is cancelled before the next one is
/// subscribed. A failing inner stream fails the result; a completing one
/// leaves it waiting for the next tick.
pub fn publish_on_signal<T, E, F>(signal: &Signal, factory: F) -> Stream<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
    F: Fn() -> Stream<T, E> + Send + Sync + 'static,
{
    signal
        .set_failure_type::<E>()
        .map(move |()| factory())
        .switch_to_latest()
}

/// Like [`publish_on_signal`], with one extra build on subscription.
///
/// This is the "load now, reload on demand" entry point.
pub fn publish_and_repeat_on_signal<T, E, F>(signal: &Signal, factory: F) -> Stream<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
    F: Fn() -> Stream<T, E> + Send + Sync + 'static,
{
    publish_on_signal(&signal.prepend(()), factory)
}

/// Combine the latest values of every stream into ordered snapshots.
///
/// The i-th element of each snapshot is the most recent value of the i-th
/// stream. Nothing is emitted until every stream has emitted once; after
/// that, every value from any input produces a snapshot. The first failure
/// fails the whole result and cancels the other inputs.
///
/// With no streams at all, one empty snapshot is emitted and the result
/// then stays silent forever.
pub fn accumulate_latest_many<T, E, I>(streams: I) -> Stream<Vec<T>, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
    I: IntoIterator<Item = Stream<T, E>>,
{
    let streams: Vec<Stream<T, E>> = streams.into_iter().collect();
    accumulate(&streams)
}

fn accumulate<T, E>(streams: &[Stream<T, E>]) -> Stream<Vec<T>, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    match streams {
        [] => Stream::never().prepend(Vec::new()),
        [only] => only.map(|value| vec![value]),
        [a, b] => combine_latest(a, b).map(|(a, b)| vec![a, b]),
        [a, b, c] => combine_latest3(a, b, c).map(|(a, b, c)| vec![a, b, c]),
        _ => {
            let (left, right) = streams.split_at(streams.len() / 2);
            combine_latest(&accumulate(left), &accumulate(right)).map(|(mut left, right)| {
                left.extend(right);
                left
            })
        }
    }
}

impl<T, E> Stream<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Method form of [`wait_until`].
    pub fn wait_until<S>(&self, signal: &Stream<S, Never>) -> Self
    where
        S: Send + 'static,
    {
        wait_until(self, signal)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::testing::Recorder;
    use crate::stream::{Event, Never, Subject};
    use crate::trigger::Trigger;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn wait_until_defers_subscription() {
        let trigger = Trigger::new();
        let subscribed = Arc::new(AtomicUsize::new(0));
        let subscribed_clone = subscribed.clone();

        let source = Stream::<i32>::from_iter(vec![1, 2])
            .on_subscribe(move || {
                subscribed_clone.fetch_add(1, Ordering::SeqCst);
            })
            .wait_until(&trigger.signal("go"));

        let recorder = Recorder::<i32, Never>::new();
        let _sub = source.subscribe(recorder.observer());
        assert_eq!(subscribed.load(Ordering::SeqCst), 0);
        assert!(recorder.events().is_empty());

        trigger.activate(&"go");
        assert_eq!(subscribed.load(Ordering::SeqCst), 1);
        assert_eq!(
            recorder.events(),
            vec![Event::Value(1), Event::Value(2), Event::Completed]
        );

        // Later ticks are ignored and the signal is released
        trigger.activate(&"go");
        assert_eq!(subscribed.load(Ordering::SeqCst), 1);
        assert_eq!(trigger.listener_count(&"go"), 0);
    }

    #[test]
    fn wait_until_without_tick_stays_silent() {
        let trigger = Trigger::<u8>::new();
        let recorder = Recorder::<i32, &str>::new();

        let _sub = wait_until(&Stream::<i32, &str>::fail("early"), &trigger.signal(0))
            .subscribe(recorder.observer());

        trigger.activate(&1);
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn wait_until_accepts_any_failure_free_stream() {
        let ready = Subject::<&str, Never>::new();
        let recorder = Recorder::<i32, Never>::new();

        let _sub = Stream::<i32>::just(3)
            .wait_until(&ready.stream())
            .subscribe(recorder.observer());
        assert!(recorder.events().is_empty());

        ready.send("connected");
        assert_eq!(recorder.events(), vec![Event::Value(3), Event::Completed]);
        assert_eq!(ready.subscriber_count(), 0);
    }

    #[test]
    fn wait_until_cancel_releases_both_sides() {
        let trigger = Trigger::new();
        let subject = Subject::<i32, Never>::new();
        let recorder = Recorder::<i32, Never>::new();

        let subscription = subject
            .stream()
            .wait_until(&trigger.signal(()))
            .subscribe(recorder.observer());
        trigger.activate(&());
        subject.send(5);
        assert_eq!(subject.subscriber_count(), 1);

        subscription.cancel();
        subject.send(6);
        assert_eq!(recorder.values(), vec![5]);
        assert_eq!(subject.subscriber_count(), 0);
        assert_eq!(trigger.listener_count(&()), 0);
    }

    #[test]
    fn publish_calls_factory_once_per_tick() {
        let trigger = Trigger::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let published = publish_on_signal(&trigger.signal("refresh"), move || {
            let call = calls_clone.fetch_add(1, Ordering::SeqCst) as i32;
            Stream::<i32>::just(call)
        });

        let recorder = Recorder::<i32, Never>::new();
        let _sub = published.subscribe(recorder.observer());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(recorder.events().is_empty());

        for _ in 0..3 {
            trigger.activate(&"refresh");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Inner completions do not complete the composite
        assert_eq!(recorder.events(), vec![Event::Value(0), Event::Value(1), Event::Value(2)]);
    }

    #[test]
    fn publish_cancels_previous_inner_first() {
        let trigger = Trigger::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        let published = {
            let log = log.clone();
            publish_on_signal(&trigger.signal(0), move || {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                let (on_sub, on_cancel) = (log.clone(), log.clone());
                let emitted = log.clone();
                Stream::<usize>::never()
                    .prepend(call)
                    .on_subscribe(move || on_sub.lock().push(format!("subscribe {call}")))
                    .on_cancel(move || on_cancel.lock().push(format!("cancel {call}")))
                    .map(move |value| {
                        emitted.lock().push(format!("value {value}"));
                        value
                    })
            })
        };

        let _sub = published.subscribe(|_| {});
        trigger.activate(&0);
        trigger.activate(&0);

        assert_eq!(
            *log.lock(),
            vec!["subscribe 0", "value 0", "cancel 0", "subscribe 1", "value 1"]
        );
    }

    #[test]
    fn publish_inner_failure_terminates() {
        let trigger = Trigger::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let published = publish_on_signal(&trigger.signal(()), move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Stream::<i32, &str>::fail("offline")
        });

        let recorder = Recorder::<i32, &str>::new();
        let _sub = published.subscribe(recorder.observer());
        trigger.activate(&());
        trigger.activate(&());

        assert_eq!(recorder.failure(), Some("offline"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(trigger.listener_count(&()), 0);
    }

    #[test]
    fn repeat_builds_eagerly() {
        let trigger = Trigger::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let published = publish_and_repeat_on_signal(&trigger.signal("reload"), move || {
            let call = calls_clone.fetch_add(1, Ordering::SeqCst) as i32;
            Stream::<i32>::just(call * 10)
        });

        let recorder = Recorder::<i32, Never>::new();
        let _sub = published.subscribe(recorder.observer());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.values(), vec![0]);

        trigger.activate(&"reload");
        trigger.activate(&"reload");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(recorder.values(), vec![0, 10, 20]);
    }

    #[test]
    fn accumulate_nothing_emits_empty_once() {
        let recorder = Recorder::<Vec<i32>, Never>::new();
        let _sub = accumulate_latest_many(Vec::<Stream<i32>>::new()).subscribe(recorder.observer());

        assert_eq!(recorder.events(), vec![Event::Value(Vec::new())]);
    }

    #[test]
    fn accumulate_single_stream_wraps_values() {
        let recorder = Recorder::<Vec<i32>, Never>::new();
        let _sub = accumulate_latest_many(vec![Stream::<i32>::from_iter(vec![1, 2, 3])])
            .subscribe(recorder.observer());

        assert_eq!(recorder.values(), vec![vec![1], vec![2], vec![3]]);
        assert!(recorder.is_completed());
    }

    #[test]
    fn accumulate_waits_for_every_input() {
        let a = Subject::<i32, Never>::new();
        let b = Subject::<i32, Never>::new();
        let recorder = Recorder::<Vec<i32>, Never>::new();

        let _sub = accumulate_latest_many([a.stream(), b.stream()]).subscribe(recorder.observer());
        a.send(1);
        a.send(2);
        assert!(recorder.values().is_empty());

        b.send(10);
        a.send(3);
        assert_eq!(recorder.values(), vec![vec![2, 10], vec![3, 10]]);
    }

    #[test]
    fn accumulate_splits_large_inputs_in_order() {
        let subjects: Vec<Subject<usize, Never>> = (0..7).map(|_| Subject::new()).collect();
        let recorder = Recorder::<Vec<usize>, Never>::new();

        let _sub = accumulate_latest_many(subjects.iter().map(Subject::stream))
            .subscribe(recorder.observer());
        for (index, subject) in subjects.iter().enumerate() {
            subject.send(index);
        }
        subjects[4].send(40);

        assert_eq!(
            recorder.values(),
            vec![vec![0, 1, 2, 3, 4, 5, 6], vec![0, 1, 2, 3, 40, 5, 6]]
        );
    }

    #[test]
    fn accumulate_failure_cancels_other_inputs() {
        let subjects: Vec<Subject<i32, &str>> = (0..4).map(|_| Subject::new()).collect();
        let recorder = Recorder::<Vec<i32>, &str>::new();

        let _sub = accumulate_latest_many(subjects.iter().map(Subject::stream))
            .subscribe(recorder.observer());
        subjects[0].send(1);
        subjects[3].fail("lost");

        assert_eq!(recorder.failure(), Some("lost"));
        assert!(subjects.iter().all(|subject| subject.subscriber_count() == 0));
    }
}
