//! Notification listeners.
//!
//! Adapters observe the shared receive stream by registering a [`UrcHandler`].
//! Every parsed notification is broadcast to every registered handler on the
//! engine's dispatch task; each handler filters by its own session ID.

use std::sync::{Arc, Mutex, PoisonError};

use super::parser::Urc;

/// Something that reacts to parsed notifications.
///
/// Handlers run on the dispatch task. They must not block for long and must
/// never issue commands, since the task that would complete the command is
/// the one running the handler. Set flags, append to buffers, notify waiters.
pub trait UrcHandler: Send + Sync {
    /// Handle one notification.
    fn handle(&self, urc: &Urc);
}

impl<F> UrcHandler for F
where
    F: Fn(&Urc) + Send + Sync,
{
    fn handle(&self, urc: &Urc) {
        self(urc)
    }
}

/// Opaque token returned by registration; pass it back to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

#[derive(Default)]
struct Entries {
    next_id: u64,
    handlers: Vec<(ListenerHandle, Arc<dyn UrcHandler>)>,
}

/// Registry of handlers keyed by [`ListenerHandle`].
///
/// Registration order is stable but carries no dispatch priority. Dispatch
/// works on a snapshot, so handlers may be added or removed while a
/// notification is being delivered.
#[derive(Default)]
pub struct ListenerRegistry {
    entries: Mutex<Entries>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler and return the handle that removes it again.
    pub fn register(&self, handler: Arc<dyn UrcHandler>) -> ListenerHandle {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = ListenerHandle(entries.next_id);
        entries.next_id += 1;
        entries.handlers.push((handle, handler));
        handle
    }

    /// Remove a handler. Unknown handles are ignored.
    pub fn unregister(&self, handle: ListenerHandle) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.handlers.retain(|(h, _)| *h != handle);
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .len()
    }

    /// `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `urc` to every handler registered at the time of the call.
    pub fn dispatch(&self, urc: &Urc) {
        let snapshot: Vec<Arc<dyn UrcHandler>> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in snapshot {
            handler.handle(urc);
        }
    }
}

impl core::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_reaches_every_handler() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            registry.register(Arc::new(move |_: &Urc| {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }
        registry.dispatch(&Urc::new("CSQ", Vec::new()));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unregister_removes_only_that_handler() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&hits);
        let first = registry.register(Arc::new(move |_: &Urc| {
            counted.fetch_add(1, Ordering::SeqCst);
        }));
        let counted = Arc::clone(&hits);
        registry.register(Arc::new(move |_: &Urc| {
            counted.fetch_add(10, Ordering::SeqCst);
        }));

        registry.unregister(first);
        registry.unregister(first);
        registry.dispatch(&Urc::new("CSQ", Vec::new()));

        assert_eq!(registry.len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_handler_may_unregister_during_dispatch() {
        let registry = Arc::new(ListenerRegistry::new());
        let slot: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));
        let (reg, own) = (Arc::clone(&registry), Arc::clone(&slot));
        let handle = registry.register(Arc::new(move |_: &Urc| {
            if let Some(h) = own.lock().unwrap().take() {
                reg.unregister(h);
            }
        }));
        *slot.lock().unwrap() = Some(handle);

        registry.dispatch(&Urc::new("MATREADY", Vec::new()));
        assert!(registry.is_empty());
    }
}
