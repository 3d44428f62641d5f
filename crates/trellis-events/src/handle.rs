#![forbid(unsafe_code)]

//! Unsubscribe tokens and bulk teardown.
//!
//! [`EventHandle`] is returned from every listen call on an
//! [`EventEmitter`](crate::EventEmitter). It owns nothing but the ability
//! to detach its listener: removal is idempotent and safe to call after the
//! owning emitter has been disposed (the handle holds only a weak
//! back-reference).
//!
//! [`EventHandler`] collects handles so a host object can tear down all of
//! its subscriptions in one call when it is disposed.

/// Unsubscribe token for one listen call.
///
/// The token is type-erased: it can detach listeners from emitters of any
/// payload type, which lets an [`EventHandler`] hold a mixed bag of
/// subscriptions.
pub struct EventHandle {
    detach: Box<dyn Fn()>,
}

impl EventHandle {
    /// Build a handle around a detach closure. The closure must be
    /// idempotent; emitters guarantee this by removing records by id.
    pub(crate) fn new(detach: impl Fn() + 'static) -> Self {
        Self {
            detach: Box::new(detach),
        }
    }

    /// A handle that detaches nothing. Returned when registration was
    /// refused (disposed emitter, zero-times `many`).
    #[must_use]
    pub fn noop() -> Self {
        Self {
            detach: Box::new(|| {}),
        }
    }

    /// Detach the listener this handle was returned for.
    ///
    /// Idempotent; a no-op when the listener is already gone or the
    /// emitter has been disposed or dropped.
    pub fn remove_listener(&self) {
        (self.detach)();
    }
}

impl std::fmt::Debug for EventHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandle").finish_non_exhaustive()
    }
}

/// A collection of [`EventHandle`]s for bulk teardown.
///
/// Reusable: after [`remove_all_listeners`](Self::remove_all_listeners)
/// clears the collection, new handles may be added again.
#[derive(Debug, Default)]
pub struct EventHandler {
    handles: Vec<EventHandle>,
}

impl EventHandler {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a handle for later teardown.
    pub fn add(&mut self, handle: EventHandle) {
        self.handles.push(handle);
    }

    /// Number of handles currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Detach every held listener and clear the collection. Safe to call
    /// repeatedly.
    pub fn remove_all_listeners(&mut self) {
        for handle in &self.handles {
            handle.remove_listener();
        }
        self.handles.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::{EventArgs, EventEmitter};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn remove_listener_is_idempotent() {
        let emitter: EventEmitter<EventArgs> = EventEmitter::new();
        let count = Rc::new(Cell::new(0u32));
        let count_in = Rc::clone(&count);
        let handle = emitter.on("e", Rc::new(move |_| count_in.set(count_in.get() + 1)));

        handle.remove_listener();
        handle.remove_listener();
        emitter.emit("e", vec![]);
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn remove_listener_after_emitter_dropped() {
        let handle = {
            let emitter: EventEmitter<EventArgs> = EventEmitter::new();
            emitter.on("e", Rc::new(|_| {}))
        };
        // Emitter is gone; removal must be a silent no-op.
        handle.remove_listener();
    }

    #[test]
    fn handler_bulk_teardown() {
        let emitter: EventEmitter<EventArgs> = EventEmitter::new();
        let count = Rc::new(Cell::new(0u32));

        let mut handler = EventHandler::new();
        for _ in 0..3 {
            let count_in = Rc::clone(&count);
            handler.add(emitter.on("e", Rc::new(move |_| count_in.set(count_in.get() + 1))));
        }
        assert_eq!(handler.len(), 3);

        emitter.emit("e", vec![]);
        assert_eq!(count.get(), 3);

        handler.remove_all_listeners();
        assert!(handler.is_empty());
        emitter.emit("e", vec![]);
        assert_eq!(count.get(), 3);

        // Safe to call again, and reusable afterwards.
        handler.remove_all_listeners();
        let count_in = Rc::clone(&count);
        handler.add(emitter.on("e", Rc::new(move |_| count_in.set(count_in.get() + 1))));
        emitter.emit("e", vec![]);
        assert_eq!(count.get(), 4);
    }
}
