//! Listener registries owned by a room.
//!
//! Every event source on a room (status, discontinuity, messages, typing, ...)
//! keeps its subscribers in a [`Listeners`] collection. Subscribing returns a
//! [`Subscription`] token; calling [`Subscription::unsubscribe`] removes the
//! listener. There is no global registry: dropping the owner drops its
//! listeners.
//!
//! Emission snapshots the registered callbacks and invokes them without
//! holding the registry lock, so a listener may subscribe or unsubscribe from
//! inside its own callback.

use std::{
    fmt,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// Ordered collection of listeners for events of type `T`.
pub struct Listeners<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T: 'static> Listeners<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { registry: Arc::new(Mutex::new(Registry { next_id: 0, entries: Vec::new() })) }
    }

    /// Register a listener. Listeners are invoked in registration order.
    pub fn add(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push((id, Arc::new(listener)));
            id
        };

        let registry: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.lock().entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Invoke every registered listener with `event`.
    pub fn emit(&self, event: &T) {
        let snapshot: Vec<Callback<T>> =
            self.registry.lock().entries.iter().map(|(_, cb)| Arc::clone(cb)).collect();

        for callback in snapshot {
            callback(event);
        }
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.registry.lock().entries.clear();
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.registry.lock().entries.len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self { registry: Arc::clone(&self.registry) }
    }
}

impl<T> fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners").field("count", &self.registry.lock().entries.len()).finish()
    }
}

/// Token returned when subscribing to a room event source.
///
/// Dropping the token does NOT unsubscribe; call [`Subscription::unsubscribe`]
/// to remove the listener.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Create a token that runs `unsubscribe` once.
    pub fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self { unsubscribe: Some(Box::new(unsubscribe)) }
    }

    /// Combine several tokens into one that unsubscribes all of them.
    pub fn combine(subscriptions: Vec<Self>) -> Self {
        Self::new(move || {
            for subscription in subscriptions {
                subscription.unsubscribe();
            }
        })
    }

    /// Remove the listener this token was issued for.
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("active", &self.unsubscribe.is_some()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn emit_reaches_listeners_in_order() {
        let listeners = Listeners::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = Arc::clone(&seen);
        let _a = listeners.add(move |v| s1.lock().push(("first", *v)));
        let s2 = Arc::clone(&seen);
        let _b = listeners.add(move |v| s2.lock().push(("second", *v)));

        listeners.emit(&7);

        assert_eq!(*seen.lock(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn unsubscribe_removes_only_that_listener() {
        let listeners = Listeners::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&count);
        let first = listeners.add(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&count);
        let _second = listeners.add(move |_| {
            c2.fetch_add(10, Ordering::SeqCst);
        });

        first.unsubscribe();
        listeners.emit(&0);

        assert_eq!(count.load(Ordering::SeqCst), 10);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn listener_can_subscribe_during_emit() {
        let listeners = Listeners::<u32>::new();
        let inner = listeners.clone();

        let _sub = listeners.add(move |_| {
            let _nested = inner.add(|_| {});
        });

        listeners.emit(&1);
        assert_eq!(listeners.len(), 2);
    }

    #[test]
    fn unsubscribe_after_registry_dropped_is_noop() {
        let listeners = Listeners::<u32>::new();
        let sub = listeners.add(|_| {});
        drop(listeners);

        sub.unsubscribe();
    }

    #[test]
    fn combined_subscription_unsubscribes_all() {
        let listeners = Listeners::<u32>::new();
        let a = listeners.add(|_| {});
        let b = listeners.add(|_| {});

        Subscription::combine(vec![a, b]).unsubscribe();
        assert!(listeners.is_empty());
    }

    #[test]
    fn clear_removes_everything() {
        let listeners = Listeners::<u32>::new();
        let _a = listeners.add(|_| {});
        let _b = listeners.add(|_| {});

        listeners.clear();
        assert!(listeners.is_empty());
    }
}
