//! Callback registration with unsubscribe handles.
//!
//! Components observe each other through [`Subscription`]s instead of holding references back to
//! the observer, so dropping either side never leaves a dangling registration.
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, PoisonError, Weak,
};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback<T>)>>,
}

/// A list of callbacks interested in values of type `T`.
pub(crate) struct Listeners<T> {
    registry: Arc<Registry<T>>,
}

impl<T: 'static> Listeners<T> {
    pub(crate) fn new() -> Listeners<T> {
        Listeners {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(0),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));

        let registry: Weak<Registry<T>> = Arc::downgrade(&self.registry);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry
                        .callbacks
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .retain(|(callback_id, _)| *callback_id != id);
                }
            })),
        }
    }

    /// Call every registered callback with `value`.
    ///
    /// Callbacks are invoked outside of the registry lock, so they may subscribe or unsubscribe.
    pub(crate) fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self
            .registry
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        for callback in callbacks {
            callback(value);
        }
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.registry
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Listeners {
            registry: self.registry.clone(),
        }
    }
}

/// Keeps a callback registered. The callback is removed when the subscription is dropped or
/// [`unsubscribe`](Subscription::unsubscribe)d.
#[must_use = "the callback is unregistered as soon as the subscription is dropped"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the callback.
    pub fn unsubscribe(mut self) {
        self.run_unsubscribe();
    }

    fn run_unsubscribe(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

/// A boolean state owned by the platform layer, e.g. "network is connected" or "application is
/// in background".
///
/// Cloning a `Signal` returns a handle to the same state.
#[derive(Clone)]
pub struct Signal {
    value: Arc<AtomicBool>,
    listeners: Listeners<bool>,
}

impl Signal {
    /// Create a signal with the `initial` value.
    pub fn new(initial: bool) -> Signal {
        Signal {
            value: Arc::new(AtomicBool::new(initial)),
            listeners: Listeners::new(),
        }
    }

    /// Current value.
    pub fn get(&self) -> bool {
        self.value.load(Ordering::SeqCst)
    }

    /// Update the value. Subscribers are notified only if the value actually changed.
    pub fn set(&self, value: bool) {
        if self.value.swap(value, Ordering::SeqCst) != value {
            self.listeners.notify(&value);
        }
    }

    /// Register `callback` to be called with the new value on every change.
    pub fn subscribe(&self, callback: impl Fn(bool) + Send + Sync + 'static) -> Subscription {
        self.listeners.subscribe(move |value: &bool| callback(*value))
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Signal").field(&self.get()).finish()
    }
}

/// Platform state the polling processor reacts to. Polling is paused while the application is in
/// background or the network is disconnected.
#[derive(Debug, Clone)]
pub struct PlatformSignals {
    /// Whether the device has network connectivity.
    pub connected: Signal,
    /// Whether the application is in background.
    pub backgrounded: Signal,
}

impl PlatformSignals {
    /// Returns `true` if polling should be paused.
    pub fn is_paused(&self) -> bool {
        self.backgrounded.get() || !self.connected.get()
    }
}

impl Default for PlatformSignals {
    fn default() -> PlatformSignals {
        PlatformSignals {
            connected: Signal::new(true),
            backgrounded: Signal::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{Listeners, Signal};

    #[test]
    fn notifies_only_on_change() {
        let signal = Signal::new(false);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let _subscription = {
            let seen = seen.clone();
            signal.subscribe(move |value| seen.lock().unwrap().push(value))
        };

        signal.set(false);
        signal.set(true);
        signal.set(true);
        signal.set(false);

        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn dropping_subscription_unregisters_callback() {
        let listeners = Listeners::<u32>::new();
        let calls = Arc::new(Mutex::new(0));

        let subscription = {
            let calls = calls.clone();
            listeners.subscribe(move |_| *calls.lock().unwrap() += 1)
        };
        listeners.notify(&1);
        drop(subscription);
        listeners.notify(&2);

        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(listeners.is_empty());
    }

    #[test]
    fn explicit_unsubscribe_keeps_other_callbacks() {
        let listeners = Listeners::<u32>::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let calls = calls.clone();
            listeners.subscribe(move |v| calls.lock().unwrap().push(("first", *v)))
        };
        let _second = {
            let calls = calls.clone();
            listeners.subscribe(move |v| calls.lock().unwrap().push(("second", *v)))
        };

        first.unsubscribe();
        listeners.notify(&7);

        assert_eq!(*calls.lock().unwrap(), vec![("second", 7)]);
    }

    #[test]
    fn subscription_outlives_listeners() {
        let subscription = {
            let listeners = Listeners::<u32>::new();
            listeners.subscribe(|_| {})
        };
        drop(subscription);
    }
}
