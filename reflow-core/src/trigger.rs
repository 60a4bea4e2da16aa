//! Triggers and Signals
//!
//! A [`Trigger`] is a keyed broadcast hub. [`Trigger::signal`] hands out
//! [`Signal`]s, infinite and failure-free streams of `()` ticks, and
//! [`Trigger::activate`] makes every live signal for one key tick once.
//!
//! # How Activation Works
//!
//! 1. Subscribing a signal registers a listener under its key.
//!
//! 2. `activate(&key)` snapshots the listeners registered under `key`,
//!    releases the hub lock and delivers one tick to each of them, in
//!    subscription order.
//!
//! 3. Cancelling a signal's subscription removes its listener.
//!
//! Because delivery happens outside the lock, a listener may subscribe new
//! signals or activate the trigger again while it is being notified.
//! Listeners added during a broadcast do not receive the tick in flight;
//! listeners cancelled during a broadcast are skipped.
//!
//! # Routing
//!
//! Keys are compared with `Eq`, never by hash alone. Two unequal keys whose
//! hashes collide still get separate channels.
//!
//! # Lifetime
//!
//! Signals only hold a weak reference to the hub. Dropping the trigger
//! releases every listener; signals subscribed afterwards never tick.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

use crate::error::TriggerError;
use crate::stream::{Emitter, Never, Stream, SubscriberId, Subscription};

/// An infinite, failure-free stream of ticks.
pub type Signal = Stream<(), Never>;

/// Requirements for trigger keys.
pub trait TriggerKey: Eq + Hash + Clone + Send + Sync + 'static {}

impl<K> TriggerKey for K where K: Eq + Hash + Clone + Send + Sync + 'static {}

type Listeners = SmallVec<[(SubscriberId, Emitter<(), Never>); 2]>;

/// The shared broadcast channel.
struct Hub<K> {
    channels: IndexMap<K, Listeners>,
}

impl<K: TriggerKey> Hub<K> {
    fn new() -> Self {
        Self {
            channels: IndexMap::new(),
        }
    }

    fn add(&mut self, key: K, id: SubscriberId, tick: Emitter<(), Never>) {
        self.channels.entry(key).or_default().push((id, tick));
    }

    /// Remove one listener, handing it back so it is dropped outside the lock.
    fn remove(&mut self, key: &K, id: SubscriberId) -> Option<(SubscriberId, Emitter<(), Never>)> {
        let listeners = self.channels.get_mut(key)?;
        let position = listeners.iter().position(|(other, _)| *other == id)?;
        let removed = listeners.remove(position);
        if listeners.is_empty() {
            self.channels.shift_remove(key);
        }
        Some(removed)
    }

    fn listeners(&self, key: &K) -> Listeners {
        self.channels.get(key).cloned().unwrap_or_default()
    }
}

fn signal_for<K: TriggerKey>(hub: Weak<Mutex<Hub<K>>>, key: K) -> Signal {
    Stream::new(move |down: Emitter<(), Never>| {
        let Some(strong) = hub.upgrade() else {
            return Subscription::empty();
        };
        let id = SubscriberId::new();
        strong.lock().add(key.clone(), id, down);
        trace!(subscriber = id.as_u64(), "signal subscribed");

        let hub = Weak::clone(&hub);
        let key = key.clone();
        Subscription::new(move || {
            if let Some(hub) = hub.upgrade() {
                let removed = hub.lock().remove(&key, id);
                drop(removed);
            }
        })
    })
}

fn broadcast<K: TriggerKey>(hub: &Mutex<Hub<K>>, key: &K) {
    let listeners = hub.lock().listeners(key);
    trace!(listeners = listeners.len(), "trigger activated");
    for (_, tick) in &listeners {
        tick.value(());
    }
}

/// A keyed broadcast hub producing [`Signal`]s.
///
/// # Type Parameters
///
/// - `K`: The key type. Any `Eq + Hash + Clone` value works; an enum of the
///   actions a screen supports is the usual choice.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone, PartialEq, Eq, Hash)]
/// enum Action { Reload, LoadMore(String) }
///
/// let trigger = Trigger::new();
/// let reload = trigger.signal(Action::Reload);
///
/// let _subscription = reload.subscribe(|_| println!("reload"));
/// trigger.activate(&Action::Reload); // Prints "reload"
/// trigger.activate(&Action::LoadMore("news".into())); // Nothing
/// ```
pub struct Trigger<K: TriggerKey> {
    hub: Arc<Mutex<Hub<K>>>,
}

impl<K: TriggerKey> Trigger<K> {
    /// Create a trigger with no listeners.
    pub fn new() -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub::new())),
        }
    }

    /// A signal ticking once per `activate` call for `key`.
    ///
    /// Activations that happen before the signal is subscribed are not
    /// replayed.
    pub fn signal(&self, key: K) -> Signal {
        signal_for(Arc::downgrade(&self.hub), key)
    }

    /// Tick every currently subscribed signal for `key`.
    pub fn activate(&self, key: &K) {
        broadcast(&self.hub, key);
    }

    /// A weak handle for collaborators that activate or observe this trigger.
    pub fn handle(&self) -> TriggerHandle<K> {
        TriggerHandle {
            hub: Arc::downgrade(&self.hub),
        }
    }

    /// Number of subscribed signals for `key`.
    pub fn listener_count(&self, key: &K) -> usize {
        self.hub.lock().channels.get(key).map_or(0, |listeners| listeners.len())
    }

    /// Keys with at least one subscribed signal, in first-subscription order.
    pub fn active_keys(&self) -> Vec<K> {
        self.hub.lock().channels.keys().cloned().collect()
    }
}

impl<K: TriggerKey> Default for Trigger<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: TriggerKey> Drop for Trigger<K> {
    fn drop(&mut self) {
        let released = std::mem::take(&mut self.hub.lock().channels);
        trace!(keys = released.len(), "trigger released");
        drop(released);
    }
}

impl<K: TriggerKey> Debug for Trigger<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trigger")
            .field("active_keys", &self.hub.lock().channels.len())
            .finish()
    }
}

/// Weak access to a [`Trigger`] owned elsewhere.
///
/// The handle does not keep the trigger alive. Once the owner drops it,
/// activations fail with [`TriggerError::Released`] and new signals never
/// tick.
pub struct TriggerHandle<K: TriggerKey> {
    hub: Weak<Mutex<Hub<K>>>,
}

impl<K: TriggerKey> TriggerHandle<K> {
    /// Tick every currently subscribed signal for `key`.
    pub fn activate(&self, key: &K) -> Result<(), TriggerError> {
        let hub = self.hub.upgrade().ok_or(TriggerError::Released)?;
        broadcast(&hub, key);
        Ok(())
    }

    /// A signal for `key`, as [`Trigger::signal`] would return.
    pub fn signal(&self, key: K) -> Signal {
        signal_for(Weak::clone(&self.hub), key)
    }

    /// Whether the owning trigger has been dropped.
    pub fn is_released(&self) -> bool {
        self.hub.strong_count() == 0
    }
}

impl<K: TriggerKey> Clone for TriggerHandle<K> {
    fn clone(&self) -> Self {
        Self {
            hub: Weak::clone(&self.hub),
        }
    }
}

impl<K: TriggerKey> Debug for TriggerHandle<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerHandle")
            .field("released", &self.is_released())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
