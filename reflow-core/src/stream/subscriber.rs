//! Subscriber identity for the push stream system.
//!
//! Every listener registered with a broadcast hub (a trigger channel, for
//! instance) gets a unique [`SubscriberId`]. The id is what cancellation uses
//! to find and remove the listener again.

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a subscriber.
///
/// Ids are never reused within a process, so a stale id held by an already
/// cancelled subscription can never remove somebody else's listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value, mostly useful in log fields.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}
