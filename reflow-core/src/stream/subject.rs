//! Multicast subject.
//!
//! A [`Subject`] is a hand-driven source: values pushed into it are delivered
//! to every subscriber live at that moment. It does not replay values to late
//! subscribers, only its terminal event.

use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::{Emitter, Event, Stream, SubscriberId, Subscription};

type Listeners<T, E> = SmallVec<[(SubscriberId, Emitter<T, E>); 2]>;

struct SubjectState<T, E> {
    listeners: Listeners<T, E>,
    terminal: Option<Event<T, E>>,
}

/// A hand-driven multicast source.
///
/// # Example
///
/// ```rust,ignore
/// let subject = Subject::<i32, Never>::new();
/// let _subscription = subject.stream().subscribe(|event| println!("{event:?}"));
///
/// subject.send(1);   // Prints Value(1)
/// subject.complete(); // Prints Completed
/// ```
pub struct Subject<T, E> {
    state: Arc<Mutex<SubjectState<T, E>>>,
}

impl<T, E> Subject<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Create a subject with no subscribers.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SubjectState {
                listeners: SmallVec::new(),
                terminal: None,
            })),
        }
    }

    /// A stream observing this subject.
    pub fn stream(&self) -> Stream<T, E> {
        let state = Arc::clone(&self.state);
        Stream::new(move |down: Emitter<T, E>| {
            let id = SubscriberId::new();
            let terminal = {
                let mut guard = state.lock();
                let terminal = guard.terminal.clone();
                if terminal.is_none() {
                    guard.listeners.push((id, down.clone()));
                }
                terminal
            };
            if let Some(terminal) = terminal {
                down.send(terminal);
                return Subscription::empty();
            }

            let state = Arc::clone(&state);
            Subscription::new(move || {
                let removed = {
                    let mut guard = state.lock();
                    let position = guard.listeners.iter().position(|(other, _)| *other == id);
                    position.map(|position| guard.listeners.remove(position))
                };
                drop(removed);
            })
        })
    }

    /// Deliver a value to every current subscriber.
    pub fn send(&self, value: T) {
        for (_, listener) in self.snapshot() {
            listener.value(value.clone());
        }
    }

    /// Fail every current and future subscriber.
    pub fn fail(&self, error: E) {
        self.finish(Event::Failed(error));
    }

    /// Complete every current and future subscriber.
    pub fn complete(&self) {
        self.finish(Event::Completed);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    fn snapshot(&self) -> Listeners<T, E> {
        self.state.lock().listeners.clone()
    }

    fn finish(&self, terminal: Event<T, E>) {
        let listeners = {
            let mut guard = self.state.lock();
            if guard.terminal.is_some() {
                return;
            }
            guard.terminal = Some(terminal.clone());
            std::mem::take(&mut guard.listeners)
        };
        for (_, listener) in listeners {
            listener.send(terminal.clone());
        }
    }
}

impl<T, E> Default for Subject<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Clone for Subject<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}
