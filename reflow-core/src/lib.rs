//! Reflow Core
//!
//! This crate provides composable push streams for building refresh and
//! pagination flows. It implements:
//!
//! - A lazily subscribed, cancellable push [`Stream`] with its operators
//! - Keyed broadcast [`Trigger`]s producing failure-free [`Signal`]s
//! - Signal-driven combinators (wait, publish, publish-and-repeat)
//! - N-way latest-value accumulation
//! - Trigger-driven pagination with retry on demand
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `stream`: The stream primitive, subscriptions and generic operators
//! - `trigger`: Keyed broadcast hub and signals
//! - `algebra`: Combinators bridging signals and streams
//! - `pagination`: The pagination state machine
//! - `retry`: Retry policies shared by `retry` and pagination
//! - `error`: Library error types
//!
//! # Example
//!
//! ```rust,ignore
//! use reflow_core::{publish_and_repeat_on_signal, Stream, Trigger};
//!
//! let trigger = Trigger::new();
//!
//! // Load now, and again on every "reload"
//! let feed = publish_and_repeat_on_signal(&trigger.signal("reload"), || {
//!     Stream::<&str>::just("fresh items")
//! });
//!
//! let _subscription = feed.subscribe(|event| println!("{event:?}"));
//! // Prints Value("fresh items")
//!
//! trigger.activate(&"reload");
//! // Prints Value("fresh items") again
//! ```

pub mod algebra;
pub mod error;
pub mod pagination;
pub mod retry;
pub mod stream;
pub mod trigger;

pub use algebra::{accumulate_latest_many, publish_and_repeat_on_signal, publish_on_signal, wait_until};
pub use error::TriggerError;
pub use pagination::{paginate, paginate_with, Page, PaginationConfig};
pub use retry::RetryPolicy;
pub use stream::{
    combine_latest, combine_latest3, AsyncEvents, Emitter, Event, Never, Stream, Subject,
    SubscriberId, Subscription, SubscriptionSlot,
};
pub use trigger::{Signal, Trigger, TriggerHandle, TriggerKey};
