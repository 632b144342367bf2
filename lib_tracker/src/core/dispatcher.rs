//! # Message Dispatcher
//!
//! The ordered subscriber set behind `StreamTransport::on_message`. Every
//! validated ping is handed to each registered handler, synchronously and in
//! registration order.
//!
//! ## Core Design Principles:
//!
//! 1.  **Set Semantics**: A handler is identified by its `Arc` allocation.
//!     Registering the same `Arc` twice keeps a single entry, so it is still
//!     called once per message.
//!
//! 2.  **No Back-pressure**: Delivery is fire-and-forget. Handlers run on the
//!     caller's task and should return quickly; anything slow belongs behind a
//!     channel owned by the subscriber.
//!
//! 3.  **Re-entrancy**: The handler list is snapshotted before delivery, so a
//!     handler may add or remove subscribers (itself included) while a message
//!     is being dispatched. The change applies from the next message on.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A subscriber callback.
pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered set of handlers for messages of type `T`.
pub struct Dispatcher<T> {
    handlers: Mutex<Vec<Handler<T>>>,
}

impl<T> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Dispatcher<T> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// # Add Handler
    ///
    /// Appends `handler` unless the same allocation is already registered.
    ///
    /// # Returns
    /// `true` when the handler was newly added.
    pub fn add_handler(&self, handler: Handler<T>) -> bool {
        let mut handlers = self.lock();
        if handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return false;
        }
        handlers.push(handler);
        true
    }

    /// Removes `handler`. Returns `true` when it was registered.
    pub fn remove_handler(&self, handler: &Handler<T>) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|h| !Arc::ptr_eq(h, handler));
        handlers.len() != before
    }

    /// # Broadcast
    ///
    /// Calls every registered handler with `message`, in registration order.
    ///
    /// # Returns
    /// The number of handlers invoked.
    pub fn broadcast(&self, message: &T) -> usize {
        let snapshot: Vec<Handler<T>> = self.lock().clone();
        for handler in &snapshot {
            handler(message);
        }
        snapshot.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panicking handler never runs while the lock is held, so a poisoned
    // list is still consistent.
    fn lock(&self) -> MutexGuard<'_, Vec<Handler<T>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn duplicate_registration_delivers_once() {
        let calls = Arc::new(StdMutex::new(0));
        let counter = Arc::clone(&calls);
        let handler: Handler<u32> = Arc::new(move |_: &u32| *counter.lock().unwrap() += 1);

        let dispatcher = Dispatcher::new();
        assert!(dispatcher.add_handler(Arc::clone(&handler)));
        assert!(!dispatcher.add_handler(Arc::clone(&handler)));

        assert_eq!(dispatcher.broadcast(&7), 1);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn delivers_in_registration_order() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let dispatcher: Dispatcher<u32> = Dispatcher::new();
        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            dispatcher.add_handler(Arc::new(move |msg: &u32| seen.lock().unwrap().push((tag, *msg))));
        }

        dispatcher.broadcast(&1);
        assert_eq!(*seen.lock().unwrap(), vec![("first", 1), ("second", 1), ("third", 1)]);
    }

    #[test]
    fn removed_handler_stops_receiving() {
        let calls = Arc::new(StdMutex::new(0));
        let counter = Arc::clone(&calls);
        let handler: Handler<u32> = Arc::new(move |_: &u32| *counter.lock().unwrap() += 1);

        let dispatcher = Dispatcher::new();
        dispatcher.add_handler(Arc::clone(&handler));
        dispatcher.broadcast(&1);
        assert!(dispatcher.remove_handler(&handler));
        assert!(!dispatcher.remove_handler(&handler));
        dispatcher.broadcast(&2);

        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn handler_may_unsubscribe_itself() {
        let dispatcher: Arc<Dispatcher<u32>> = Arc::new(Dispatcher::new());
        let slot: Arc<StdMutex<Option<Handler<u32>>>> = Arc::new(StdMutex::new(None));

        let weak = Arc::downgrade(&dispatcher);
        let own = Arc::clone(&slot);
        let handler: Handler<u32> = Arc::new(move |_: &u32| {
            if let (Some(d), Some(me)) = (weak.upgrade(), own.lock().unwrap().clone()) {
                d.remove_handler(&me);
            }
        });
        *slot.lock().unwrap() = Some(Arc::clone(&handler));
        dispatcher.add_handler(handler);

        assert_eq!(dispatcher.broadcast(&1), 1);
        assert_eq!(dispatcher.broadcast(&2), 0);
    }
}
