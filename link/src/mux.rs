//! Long-lived fan-out of outbound commands to short-lived listeners.
//!
//! The multiplexer outlives every connection; each connection registers a
//! listener while it is live and drops its [`MuxSubscription`] when it ends.
//! Commands emitted while nobody listens are dropped, never queued.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    listeners: Mutex<BTreeMap<u64, Listener<T>>>,
    next_id: AtomicU64,
}

impl<T> Registry<T> {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, Listener<T>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Outbound command multiplexer.
pub struct OutboundMux<T> {
    registry: Arc<Registry<T>>,
}

impl<T> Clone for OutboundMux<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<T> Default for OutboundMux<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for OutboundMux<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundMux")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl<T: 'static> OutboundMux<T> {
    /// Register `listener` until the returned subscription is dropped.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> MuxSubscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.lock().insert(id, Arc::new(listener));

        let registry: Weak<Registry<T>> = Arc::downgrade(&self.registry);
        MuxSubscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.lock().remove(&id);
                }
            })),
        }
    }
}

impl<T> OutboundMux<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                listeners: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Deliver `command` to every current listener, in registration order.
    /// Returns how many listeners saw it; zero means it was dropped.
    pub fn emit(&self, command: &T) -> usize {
        let listeners: Vec<Listener<T>> = self.registry.lock().values().cloned().collect();
        for listener in &listeners {
            listener(command);
        }
        listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.registry.lock().len()
    }
}

/// Handle of one registered listener; unsubscribes on drop.
pub struct MuxSubscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl MuxSubscription {
    pub fn unsubscribe(mut self) {
        self.run_unsubscribe();
    }

    fn run_unsubscribe(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for MuxSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MuxSubscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

impl Drop for MuxSubscription {
    fn drop(&mut self) {
        self.run_unsubscribe();
    }
}
