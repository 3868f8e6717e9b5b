//! Observer registry for card session state changes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error};
use uuid::Uuid;

/// Receiver of card session state change notifications.
///
/// The callback carries no payload; observers read the current values back
/// through the session accessors. It runs synchronously on the session's
/// background thread, so it should return quickly.
pub trait SessionObserver: Send + Sync {
    /// Called after each committed state change.
    fn state_changed(&self);
}

impl<F> SessionObserver for F
where
    F: Fn() + Send + Sync,
{
    fn state_changed(&self) {
        self()
    }
}

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry of observers, notified in subscription order.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<(SubscriptionId, Arc<dyn SessionObserver>)>>,
}

impl ObserverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer.
    pub fn subscribe(&self, observer: Arc<dyn SessionObserver>) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        debug!("Observer subscribed: id={}", id);
        id
    }

    /// Remove an observer. Returns false if the id was not registered.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(existing, _)| existing != id);
        let removed = observers.len() != before;
        if removed {
            debug!("Observer unsubscribed: id={}", id);
        }
        removed
    }

    /// Notify every registered observer.
    ///
    /// The list is copied first and the lock released before any callback
    /// runs, so callbacks may subscribe or unsubscribe. A panicking callback
    /// is logged and the remaining observers are still notified.
    pub fn notify(&self) {
        let observers: Vec<(SubscriptionId, Arc<dyn SessionObserver>)> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, observer)| (*id, Arc::clone(observer)))
            .collect();

        for (id, observer) in observers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| observer.state_changed()));
            if let Err(payload) = result {
                error!("Observer {} panicked: {}", id, panic_message(&*payload));
            }
        }
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.len())
            .finish()
    }
}
