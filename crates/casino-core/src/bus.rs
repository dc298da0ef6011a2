//! Named-event publish/subscribe.
//!
//! [`EventBus`] is generic over the event type; each event reports its own
//! name through [`BusEvent::name`], and listeners register against names.
//!
//! Delivery rules:
//! - listeners run in registration order, synchronously on the publishing task
//! - the listener list is snapshotted at the start of a publish, so
//!   (un)subscribing mid-publish only affects later publishes
//! - no lock is held while a listener runs, so listeners may re-enter the bus
//! - a panicking listener is logged and skipped; the rest still run

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, trace};

/// An event that can travel over an [`EventBus`].
pub trait BusEvent: Send + Sync + 'static {
    /// Name listeners subscribe to.
    type Name: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// Name of this event value.
    fn name(&self) -> Self::Name;
}

/// A registered callback. Identity (pointer equality) is used for removal.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Named-event registry.
pub struct EventBus<E: BusEvent> {
    listeners: RwLock<HashMap<E::Name, Vec<Listener<E>>>>,
}

impl<E: BusEvent> EventBus<E> {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// Register a listener. The same listener may be registered repeatedly;
    /// it is then invoked once per registration.
    pub fn subscribe(&self, name: E::Name, listener: Listener<E>) {
        self.listeners.write().entry(name).or_default().push(listener);
    }

    /// Wrap a closure as a listener, register it, and return the handle
    /// needed to unsubscribe it later.
    pub fn on<F>(&self, name: E::Name, callback: F) -> Listener<E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let listener: Listener<E> = Arc::new(callback);
        self.subscribe(name, listener.clone());
        listener
    }

    /// Remove the earliest registration of `listener` under `name`.
    ///
    /// Returns `false` (and does nothing) when it was not registered.
    pub fn unsubscribe(&self, name: E::Name, listener: &Listener<E>) -> bool {
        let mut listeners = self.listeners.write();
        let Some(registered) = listeners.get_mut(&name) else {
            return false;
        };
        let Some(index) = registered.iter().position(|l| same_listener(l, listener)) else {
            return false;
        };
        let _ = registered.remove(index);
        if registered.is_empty() {
            let _ = listeners.remove(&name);
        }
        true
    }

    /// Deliver `event` to every listener registered for its name.
    ///
    /// Returns the number of listeners that completed without panicking.
    pub fn publish(&self, event: &E) -> usize {
        let name = event.name();
        let snapshot: Vec<Listener<E>> = match self.listeners.read().get(&name) {
            Some(registered) => registered.clone(),
            None => return 0,
        };
        trace!(event = ?name, listeners = snapshot.len(), "publish");

        let mut delivered = 0;
        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    error!(
                        event = ?name,
                        reason = panic_message(panic.as_ref()),
                        "event listener panicked"
                    );
                }
            }
        }
        delivered
    }

    /// Number of registrations for `name`.
    pub fn listener_count(&self, name: E::Name) -> usize {
        self.listeners.read().get(&name).map_or(0, Vec::len)
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: BusEvent> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read();
        let counts: HashMap<&E::Name, usize> =
            listeners.iter().map(|(name, l)| (name, l.len())).collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}

fn same_listener<E: 'static>(a: &Listener<E>, b: &Listener<E>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
