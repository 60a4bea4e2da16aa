//! Signal-driven Pagination
//!
//! [`paginate`] turns a single-page fetch function and an optional "load
//! more" [`Signal`] into a stream of pages. Callers usually fold the pages
//! into a growing list with [`Stream::scan`].
//!
//! # How Pagination Works
//!
//! Each subscription runs a small state machine:
//!
//! ```text
//!                 page with next                     tick
//!   Fetching(0) ─────────────────▶ Waiting(1) ─────────────▶ Fetching(1) ─▶ ...
//!        │                            ▲                          │
//!        │ last page                  └──── failure (retried) ───┘
//!        ▼
//!      Done ◀──── last page / first-page failure / retries exhausted
//! ```
//!
//! 1. The first page is fetched on subscription.
//!
//! 2. A page that points at a next locator is emitted, then the machine
//!    waits for the paginator to tick before fetching again. A page without
//!    a next locator is emitted and completes the stream.
//!
//! 3. A failure on the first page is forwarded. A failure on any later page
//!    is swallowed and the same locator is fetched again on the next tick,
//!    as long as [`PaginationConfig::retry`] allows.
//!
//! Ticks that arrive while a fetch is in flight, or after the machine is
//! done, are ignored. Only the first value of each fetch is used; the fetch
//! is cancelled right after it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::retry::RetryPolicy;
use crate::stream::{Emitter, Event, Stream, Subscription, SubscriptionSlot};
use crate::trigger::Signal;

/// One fetch result: a value plus the locator of the page after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T, L> {
    /// What this page carries.
    pub value: T,
    /// Where the next page is, or `None` on the last page.
    pub next: Option<L>,
}

impl<T, L> Page<T, L> {
    /// A page followed by the page at `next`, if any.
    pub fn new(value: T, next: Option<L>) -> Self {
        Self { value, next }
    }

    /// A page with nothing after it.
    pub fn last(value: T) -> Self {
        Self { value, next: None }
    }

    /// Whether another page can be fetched after this one.
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

/// Pagination settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationConfig {
    /// How often a failed page after the first may be fetched again.
    pub retry: RetryPolicy,
}

impl PaginationConfig {
    /// Replace the retry policy for failed pages.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::Unbounded,
        }
    }
}

type FetchFn<T, L, E> = dyn Fn(Option<L>) -> Stream<Page<T, L>, E> + Send + Sync;

/// Paginate `fetch`, loading the next page on every `paginator` tick.
///
/// `fetch` receives `None` for the first page, then the locator carried by
/// the previous page. Without a paginator exactly one page is fetched.
/// Later page failures are retried on the next tick without limit; see
/// [`paginate_with`] to bound them.
pub fn paginate<T, L, E, F>(fetch: F, paginator: Option<Signal>) -> Stream<Page<T, L>, E>
where
    T: Send + 'static,
    L: Clone + Send + 'static,
    E: Send + 'static,
    F: Fn(Option<L>) -> Stream<Page<T, L>, E> + Send + Sync + 'static,
{
    paginate_with(PaginationConfig::default(), fetch, paginator)
}

/// [`paginate`] with explicit settings.
pub fn paginate_with<T, L, E, F>(
    config: PaginationConfig,
    fetch: F,
    paginator: Option<Signal>,
) -> Stream<Page<T, L>, E>
where
    T: Send + 'static,
    L: Clone + Send + 'static,
    E: Send + 'static,
    F: Fn(Option<L>) -> Stream<Page<T, L>, E> + Send + Sync + 'static,
{
    let fetch: Arc<FetchFn<T, L, E>> = Arc::new(fetch);
    Stream::new(move |down: Emitter<Page<T, L>, E>| {
        let pager = Arc::new(Pager {
            fetch: Arc::clone(&fetch),
            config,
            paginated: paginator.is_some(),
            phase: Mutex::new(Phase::Done),
            requests: AtomicU64::new(0),
            request: SubscriptionSlot::new(),
            paginator: SubscriptionSlot::new(),
            down,
        });

        pager.fetch(None, 0, 0);

        if let Some(paginator) = &paginator {
            if !pager.is_done() {
                let ticked = Arc::clone(&pager);
                let subscription = paginator.subscribe(move |_| ticked.on_tick());
                pager.paginator.replace(subscription);
            }
        }

        Subscription::new(move || pager.shutdown())
    })
}

/// Where a pagination run stands.
enum Phase<L> {
    /// A fetch is in flight.
    Fetching {
        locator: Option<L>,
        index: usize,
        failures: usize,
        request: u64,
    },

    /// Waiting for a paginator tick to fetch `locator`.
    Waiting {
        locator: Option<L>,
        index: usize,
        failures: usize,
    },

    /// No more fetches.
    Done,
}

/// Per-subscription pagination state.
struct Pager<T, L, E> {
    fetch: Arc<FetchFn<T, L, E>>,
    config: PaginationConfig,
    paginated: bool,
    phase: Mutex<Phase<L>>,
    requests: AtomicU64,
    request: SubscriptionSlot,
    paginator: SubscriptionSlot,
    down: Emitter<Page<T, L>, E>,
}

impl<T, L, E> Pager<T, L, E>
where
    T: Send + 'static,
    L: Clone + Send + 'static,
    E: Send + 'static,
{
    fn is_done(&self) -> bool {
        matches!(*self.phase.lock(), Phase::Done)
    }

    /// Whether `request` is the fetch currently in flight.
    fn is_current(&self, request: u64) -> bool {
        matches!(*self.phase.lock(), Phase::Fetching { request: current, .. } if current == request)
    }

    fn fetch(self: &Arc<Self>, locator: Option<L>, index: usize, failures: usize) {
        let request = self.requests.fetch_add(1, Ordering::SeqCst);
        *self.phase.lock() = Phase::Fetching {
            locator: locator.clone(),
            index,
            failures,
            request,
        };
        debug!(index, failures, "fetching page");

        let pager = Arc::clone(self);
        let subscription = (self.fetch)(locator).subscribe(move |event| pager.settle(request, event));

        // A fetch that settled synchronously has nothing left to keep alive
        if self.is_current(request) {
            self.request.replace(subscription);
        } else {
            drop(subscription);
        }
    }

    fn settle(&self, request: u64, event: Event<Page<T, L>, E>) {
        let (locator, index, failures) = {
            let mut phase = self.phase.lock();
            match std::mem::replace(&mut *phase, Phase::Done) {
                Phase::Fetching {
                    locator,
                    index,
                    failures,
                    request: current,
                } if current == request => (locator, index, failures),
                other => {
                    *phase = other;
                    return;
                }
            }
        };
        self.request.clear();

        match event {
            Event::Value(page) => {
                let has_next = page.has_next();
                if has_next && self.paginated {
                    *self.phase.lock() = Phase::Waiting {
                        locator: page.next.clone(),
                        index: index + 1,
                        failures: 0,
                    };
                }
                debug!(index, has_next, "page loaded");
                self.down.value(page);
                if !(has_next && self.paginated) {
                    self.finish(Event::Completed);
                }
            }
            Event::Failed(error) => {
                let failures = failures + 1;
                if index > 0 && self.config.retry.allows(failures) {
                    debug!(index, failures, "page failed, waiting to retry");
                    *self.phase.lock() = Phase::Waiting {
                        locator,
                        index,
                        failures,
                    };
                } else {
                    debug!(index, failures, "page failed");
                    self.finish(Event::Failed(error));
                }
            }
            Event::Completed => {
                debug!(index, "fetch completed without a page");
                self.finish(Event::Completed);
            }
        }
    }

    fn on_tick(self: &Arc<Self>) {
        let waiting = {
            let mut phase = self.phase.lock();
            if matches!(*phase, Phase::Waiting { .. }) {
                Some(std::mem::replace(&mut *phase, Phase::Done))
            } else {
                None
            }
        };
        match waiting {
            Some(Phase::Waiting {
                locator,
                index,
                failures,
            }) => self.fetch(locator, index, failures),
            _ => trace!("paginator tick ignored"),
        }
    }

    /// Deliver a terminal event and release the paginator.
    fn finish(&self, terminal: Event<Page<T, L>, E>) {
        *self.phase.lock() = Phase::Done;
        self.paginator.dispose();
        self.down.send(terminal);
    }

    fn shutdown(&self) {
        *self.phase.lock() = Phase::Done;
        self.request.dispose();
        self.paginator.dispose();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
