//! Integration Tests for a Paginated Feed
//!
//! These tests assemble the full flow a feed screen uses: a reload trigger
//! that rebuilds everything, one load-more trigger per topic, paginated and
//! folded rows per topic, and one aggregate stream of rows.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use reflow_core::{
    accumulate_latest_many, paginate, publish_and_repeat_on_signal, Event, Never, Page, Stream,
    Subscription, Trigger, TriggerHandle,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Action {
    Reload,
    LoadMore(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
enum FetchError {
    #[error("topic list unavailable")]
    Topics,
    #[error("topic {0} unavailable")]
    Topic(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Row {
    topic: &'static str,
    items: Vec<u32>,
}

impl Row {
    fn placeholder(topic: &'static str) -> Self {
        Self {
            topic,
            items: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Loaded(Vec<Row>),
    Failed(FetchError),
}

/// In-memory stand-in for a paged remote service.
#[derive(Clone)]
struct Backend {
    topics: Arc<Mutex<Result<Vec<&'static str>, FetchError>>>,
    pages: Arc<Mutex<HashMap<&'static str, Vec<Vec<u32>>>>>,
    topic_fetches: Arc<AtomicUsize>,
}

impl Backend {
    fn new(catalog: &[(&'static str, Vec<Vec<u32>>)]) -> Self {
        Self {
            topics: Arc::new(Mutex::new(Ok(catalog.iter().map(|(topic, _)| *topic).collect()))),
            pages: Arc::new(Mutex::new(catalog.iter().cloned().collect())),
            topic_fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn topics(&self) -> Stream<Vec<&'static str>, FetchError> {
        self.topic_fetches.fetch_add(1, Ordering::SeqCst);
        match self.topics.lock().clone() {
            Ok(topics) => Stream::just(topics),
            Err(error) => Stream::fail(error),
        }
    }

    fn page(&self, topic: &'static str, index: usize) -> Stream<Page<Vec<u32>, usize>, FetchError> {
        let catalog = self.pages.lock();
        let pages = catalog.get(topic).map(Vec::as_slice).unwrap_or_default();
        match pages.get(index) {
            Some(items) => {
                let next = (index + 1 < pages.len()).then_some(index + 1);
                Stream::just(Page::new(items.clone(), next))
            }
            None => Stream::fail(FetchError::Topic(topic)),
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// All items of one topic loaded so far, as a row.
fn topic_row(
    backend: &Backend,
    trigger: &TriggerHandle<Action>,
    topic: &'static str,
) -> Stream<Row, FetchError> {
    let backend = backend.clone();
    paginate(
        move |locator: Option<usize>| backend.page(topic, locator.unwrap_or(0)),
        Some(trigger.signal(Action::LoadMore(topic))),
    )
    .scan(Vec::new(), |items: &Vec<u32>, page| {
        let mut items = items.clone();
        items.extend(page.value);
        items
    })
    .map(move |items| Row { topic, items })
    .replace_error(Row::placeholder(topic))
    .prepend(Row::placeholder(topic))
}

/// The screen state: reloaded on demand, one row per topic.
fn feed(backend: &Backend, trigger: &Trigger<Action>) -> Stream<State> {
    let backend = backend.clone();
    let handle = trigger.handle();
    publish_and_repeat_on_signal(&trigger.signal(Action::Reload), move || {
        let backend = backend.clone();
        let handle = handle.clone();
        backend
            .topics()
            .map(move |topics| {
                accumulate_latest_many(
                    topics
                        .into_iter()
                        .map(|topic| topic_row(&backend, &handle, topic)),
                )
            })
            .switch_to_latest()
            .map(State::Loaded)
            .catch_error(|error| Stream::<State, Never>::just(State::Failed(error)))
    })
}

fn latest(states: &Mutex<Vec<Event<State, Never>>>) -> Option<State> {
    states.lock().iter().rev().find_map(|event| match event {
        Event::Value(state) => Some(state.clone()),
        _ => None,
    })
}

fn watch(stream: &Stream<State>) -> (Arc<Mutex<Vec<Event<State, Never>>>>, Subscription) {
    let states = Arc::new(Mutex::new(Vec::new()));
    let states_clone = states.clone();
    let subscription = stream.subscribe(move |event| states_clone.lock().push(event));
    (states, subscription)
}

fn rows(items: &[(&'static str, Vec<u32>)]) -> State {
    State::Loaded(
        items
            .iter()
            .map(|(topic, items)| Row {
                topic: *topic,
                items: items.clone(),
            })
            .collect(),
    )
}

/// Test the initial load, load-more per topic and reaching the last page.
#[test]
fn feed_loads_and_paginates_per_topic() {
    init_tracing();
    let backend = Backend::new(&[
        ("news", vec![vec![1, 2], vec![3, 4], vec![5]]),
        ("sport", vec![vec![10, 11]]),
    ]);
    let trigger = Trigger::new();
    let (states, _sub) = watch(&feed(&backend, &trigger));

    assert_eq!(
        latest(&states),
        Some(rows(&[("news", vec![1, 2]), ("sport", vec![10, 11])]))
    );

    trigger.activate(&Action::LoadMore("news"));
    assert_eq!(
        latest(&states),
        Some(rows(&[("news", vec![1, 2, 3, 4]), ("sport", vec![10, 11])]))
    );

    // Sport has a single page: nothing listens for more
    let before = states.lock().len();
    trigger.activate(&Action::LoadMore("sport"));
    assert_eq!(states.lock().len(), before);
    assert_eq!(trigger.listener_count(&Action::LoadMore("sport")), 0);

    trigger.activate(&Action::LoadMore("news"));
    trigger.activate(&Action::LoadMore("news"));
    assert_eq!(
        latest(&states),
        Some(rows(&[("news", vec![1, 2, 3, 4, 5]), ("sport", vec![10, 11])]))
    );
    assert_eq!(backend.topic_fetches.load(Ordering::SeqCst), 1);
}

/// Test that a reload rebuilds the whole graph from the first page.
#[test]
fn reload_restarts_pagination() {
    init_tracing();
    let backend = Backend::new(&[("news", vec![vec![1], vec![2], vec![3]])]);
    let trigger = Trigger::new();
    let (states, _sub) = watch(&feed(&backend, &trigger));

    trigger.activate(&Action::LoadMore("news"));
    assert_eq!(latest(&states), Some(rows(&[("news", vec![1, 2])])));

    trigger.activate(&Action::Reload);
    assert_eq!(latest(&states), Some(rows(&[("news", vec![1])])));
    assert_eq!(backend.topic_fetches.load(Ordering::SeqCst), 2);

    // The previous graph released its load-more listener
    assert_eq!(trigger.listener_count(&Action::LoadMore("news")), 1);

    trigger.activate(&Action::LoadMore("news"));
    assert_eq!(latest(&states), Some(rows(&[("news", vec![1, 2])])));
}

/// Test that a failing topic keeps its placeholder while others load.
#[test]
fn failing_topic_keeps_placeholder() {
    init_tracing();
    let backend = Backend::new(&[("news", vec![vec![1]])]);
    *backend.topics.lock() = Ok(vec!["news", "weather"]);

    let trigger = Trigger::new();
    let (states, _sub) = watch(&feed(&backend, &trigger));

    assert_eq!(
        latest(&states),
        Some(rows(&[("news", vec![1]), ("weather", Vec::new())]))
    );
}

/// Test that a topic list failure surfaces as a failed state and that a
/// reload recovers from it.
#[test]
fn topic_failure_then_reload() {
    init_tracing();
    let backend = Backend::new(&[("news", vec![vec![7]])]);
    *backend.topics.lock() = Err(FetchError::Topics);

    let trigger = Trigger::new();
    let (states, _sub) = watch(&feed(&backend, &trigger));
    assert_eq!(latest(&states), Some(State::Failed(FetchError::Topics)));
    assert_eq!(FetchError::Topics.to_string(), "topic list unavailable");

    *backend.topics.lock() = Ok(vec!["news"]);
    trigger.activate(&Action::Reload);
    assert_eq!(latest(&states), Some(rows(&[("news", vec![7])])));
}
