#![forbid(unsafe_code)]

//! Per-instance listener registry with ordered default listeners and an
//! optional cancellation facade.
//!
//! # Design
//!
//! [`EventEmitter<P>`] is generic over a clonable payload type `P`. Dynamic
//! argument lists (the common case for UI events) are covered by the
//! [`EventArgs`] alias; structured producers such as the state container
//! instantiate the emitter with their own payload enum instead.
//!
//! The emitter clone-shares its inner state through `Rc<RefCell<..>>`.
//! Cloning an `EventEmitter` produces a second handle to the **same**
//! listener registry.
//!
//! # Invariants
//!
//! 1. For one `emit` call, direct listeners run before wildcard (`"*"`)
//!    listeners; within each group, non-default listeners run in
//!    registration order, then default listeners in registration order.
//! 2. Default listeners are skipped when a non-default listener called
//!    [`EventFacade::prevent_default`] during the same emission.
//! 3. Emission walks a snapshot of the listener list: listeners may
//!    register, remove, or emit re-entrantly without corrupting the walk.
//!    Listeners added during an emission are not invoked by it.
//! 4. A listener registered via [`EventEmitter::many`] is removable by the
//!    identity of the *original* closure, not the internal wrapper.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

use crate::handle::EventHandle;

/// Event name that matches every emission.
pub const WILDCARD: &str = "*";

/// Payload alias for emitters carrying loosely-typed argument lists
/// (DOM-style events, component lifecycle notifications).
pub type EventArgs = Vec<serde_json::Value>;

/// A listener callback. Shared ownership so the same closure can be held
/// by the caller for identity-based removal.
pub type Listener<P> = Rc<dyn Fn(&EventScope<'_, P>)>;

/// Everything a listener sees for one emission.
pub struct EventScope<'a, P> {
    event_type: &'a str,
    payload: &'a P,
    facade: Option<&'a EventFacade>,
}

impl<'a, P> EventScope<'a, P> {
    /// Name of the event being emitted. For wildcard listeners this is the
    /// concrete event name, never `"*"`.
    #[must_use]
    pub fn event_type(&self) -> &str {
        self.event_type
    }

    /// The emitted payload.
    #[must_use]
    pub fn payload(&self) -> &'a P {
        self.payload
    }

    /// The cancellation facade, present only when the emitter has
    /// [`EventEmitter::set_should_use_facade`] enabled.
    #[must_use]
    pub fn facade(&self) -> Option<&'a EventFacade> {
        self.facade
    }
}

/// Cancellation facade handed to listeners when enabled on the emitter.
///
/// Mirrors the `{type, preventDefault, preventedDefault}` shape of DOM
/// events: any non-default listener may call [`prevent_default`], which
/// stops the default listeners of the same emission from running.
///
/// [`prevent_default`]: EventFacade::prevent_default
#[derive(Debug)]
pub struct EventFacade {
    event_type: String,
    prevented: Cell<bool>,
}

impl EventFacade {
    fn new(event_type: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            prevented: Cell::new(false),
        }
    }

    /// Name of the event this facade belongs to.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Request that default listeners be skipped for this emission.
    pub fn prevent_default(&self) {
        self.prevented.set(true);
    }

    /// Whether `prevent_default` has been called.
    #[must_use]
    pub fn prevented(&self) -> bool {
        self.prevented.get()
    }
}

/// One registered listener. Identity for removal purposes is
/// `origin.unwrap_or(callback)`.
struct ListenerRecord<P> {
    id: u64,
    callback: Listener<P>,
    origin: Option<Listener<P>>,
    default: bool,
}

struct NewListenerHook {
    id: u64,
    callback: Rc<dyn Fn(&str)>,
}

struct EmitterInner<P> {
    listeners: HashMap<String, Vec<ListenerRecord<P>>>,
    new_listener_hooks: Vec<NewListenerHook>,
    next_id: u64,
    use_facade: bool,
    disposed: bool,
}

impl<P> EmitterInner<P> {
    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn remove_by_id(&mut self, event: &str, id: u64) {
        if let Some(list) = self.listeners.get_mut(event) {
            list.retain(|r| r.id != id);
            if list.is_empty() {
                self.listeners.remove(event);
            }
        }
    }
}

/// Listener registry with ordered default listeners, wildcard listeners,
/// n-time listeners, and optional event facade.
pub struct EventEmitter<P> {
    inner: Rc<RefCell<EmitterInner<P>>>,
}

// Manual Clone: shares the same registry.
impl<P> Clone for EventEmitter<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P: 'static> Default for EventEmitter<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> std::fmt::Debug for EventEmitter<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("EventEmitter")
            .field("events", &inner.listeners.len())
            .field("use_facade", &inner.use_facade)
            .field("disposed", &inner.disposed)
            .finish()
    }
}

impl<P: 'static> EventEmitter<P> {
    /// Create an emitter with no listeners and the facade disabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(EmitterInner {
                listeners: HashMap::new(),
                new_listener_hooks: Vec::new(),
                next_id: 0,
                use_facade: false,
                disposed: false,
            })),
        }
    }

    /// Register a listener for one event name.
    pub fn on(&self, event: &str, listener: Listener<P>) -> EventHandle {
        self.add_records(&[event], listener, false, None, None)
    }

    /// Register one listener under several event names at once. The
    /// returned handle removes all of them.
    pub fn on_each(&self, events: &[&str], listener: Listener<P>) -> EventHandle {
        self.add_records(events, listener, false, None, None)
    }

    /// Register a default listener: it runs after every non-default
    /// listener of the same emission and is skipped when the facade's
    /// `prevent_default` was called.
    pub fn on_default(&self, event: &str, listener: Listener<P>) -> EventHandle {
        self.add_records(&[event], listener, true, None, None)
    }

    /// Register a listener that auto-unregisters after one invocation.
    pub fn once(&self, event: &str, listener: Listener<P>) -> EventHandle {
        self.many(event, 1, listener)
    }

    /// Register a listener that auto-unregisters after `times` invocations.
    ///
    /// The stored record keeps the original closure as its removal
    /// identity, so `off(event, &listener)` works on the closure the caller
    /// supplied here rather than on the internal countdown wrapper.
    pub fn many(&self, event: &str, times: usize, listener: Listener<P>) -> EventHandle {
        if times == 0 {
            return EventHandle::noop();
        }
        self.add_records(&[event], listener.clone(), false, Some(listener), Some(times))
    }

    /// Remove every record whose identity matches `listener` under the
    /// given event names.
    pub fn off(&self, events: &[&str], listener: &Listener<P>) {
        let mut inner = self.inner.borrow_mut();
        for event in events {
            if let Some(list) = inner.listeners.get_mut(*event) {
                list.retain(|r| {
                    let identity = r.origin.as_ref().unwrap_or(&r.callback);
                    !Rc::ptr_eq(identity, listener)
                });
                if list.is_empty() {
                    inner.listeners.remove(*event);
                }
            }
        }
    }

    /// Remove all listeners for the given event names, or every listener
    /// (wildcard included) when `events` is `None`.
    pub fn remove_all_listeners(&self, events: Option<&[&str]>) {
        let mut inner = self.inner.borrow_mut();
        match events {
            Some(names) => {
                for name in names {
                    inner.listeners.remove(*name);
                }
            }
            None => inner.listeners.clear(),
        }
    }

    /// Number of listeners registered directly under `event` (wildcard
    /// listeners not included).
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner
            .borrow()
            .listeners
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Whether an emission of `event` would reach at least one listener.
    #[must_use]
    pub fn has_listeners(&self, event: &str) -> bool {
        let inner = self.inner.borrow();
        let direct = inner.listeners.get(event).is_some_and(|l| !l.is_empty());
        direct || inner.listeners.get(WILDCARD).is_some_and(|l| !l.is_empty())
    }

    /// Enable or disable the cancellation facade for future emissions.
    pub fn set_should_use_facade(&self, use_facade: bool) {
        self.inner.borrow_mut().use_facade = use_facade;
    }

    /// Whether the facade is currently enabled.
    #[must_use]
    pub fn should_use_facade(&self) -> bool {
        self.inner.borrow().use_facade
    }

    /// Subscribe to listener registrations. The hook fires once per event
    /// name every time a listener is added, after the listener is in place.
    ///
    /// This is the meta-channel [`EventEmitterProxy`] uses for lazy attach.
    ///
    /// [`EventEmitterProxy`]: crate::proxy::EventEmitterProxy
    pub fn on_new_listener(&self, hook: Rc<dyn Fn(&str)>) -> EventHandle {
        let id = {
            let mut inner = self.inner.borrow_mut();
            if inner.disposed {
                return EventHandle::noop();
            }
            let id = inner.alloc_id();
            inner.new_listener_hooks.push(NewListenerHook {
                id,
                callback: hook,
            });
            id
        };
        let weak = Rc::downgrade(&self.inner);
        EventHandle::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().new_listener_hooks.retain(|h| h.id != id);
            }
        })
    }

    /// Emit `payload` under `event`.
    ///
    /// Returns true iff at least one listener (direct or wildcard) was
    /// registered at the start of the emission, regardless of whether
    /// default listeners were prevented.
    pub fn emit(&self, event: &str, payload: P) -> bool {
        let (records, use_facade) = {
            let inner = self.inner.borrow();
            if inner.disposed {
                return false;
            }
            let mut records: Vec<(Listener<P>, bool)> = Vec::new();
            if let Some(list) = inner.listeners.get(event) {
                records.extend(list.iter().map(|r| (r.callback.clone(), r.default)));
            }
            if event != WILDCARD
                && let Some(list) = inner.listeners.get(WILDCARD)
            {
                records.extend(list.iter().map(|r| (r.callback.clone(), r.default)));
            }
            (records, inner.use_facade)
        };
        if records.is_empty() {
            return false;
        }
        trace!(event, listeners = records.len(), "emit");

        let facade = use_facade.then(|| EventFacade::new(event));
        let scope = EventScope {
            event_type: event,
            payload: &payload,
            facade: facade.as_ref(),
        };
        for (callback, _) in records.iter().filter(|(_, default)| !default) {
            callback(&scope);
        }
        let prevented = facade.as_ref().is_some_and(EventFacade::prevented);
        if !prevented {
            for (callback, _) in records.iter().filter(|(_, default)| *default) {
                callback(&scope);
            }
        }
        true
    }

    /// Drop every listener and hook. Emission becomes a no-op returning
    /// false; removal through outstanding handles is a silent no-op.
    pub fn dispose(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.disposed = true;
        inner.listeners.clear();
        inner.new_listener_hooks.clear();
    }

    /// Whether `dispose` has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.borrow().disposed
    }

    fn add_records(
        &self,
        events: &[&str],
        listener: Listener<P>,
        default: bool,
        origin: Option<Listener<P>>,
        times: Option<usize>,
    ) -> EventHandle {
        let mut registered: Vec<(String, u64)> = Vec::with_capacity(events.len());
        {
            let mut inner = self.inner.borrow_mut();
            if inner.disposed {
                return EventHandle::noop();
            }
            for event in events {
                let id = inner.alloc_id();
                // Each name gets its own countdown for n-time listeners.
                let callback = match times {
                    Some(n) => {
                        self.countdown_wrapper(listener.clone(), (*event).to_string(), id, n)
                    }
                    None => listener.clone(),
                };
                let record = ListenerRecord {
                    id,
                    callback,
                    origin: origin.clone(),
                    default,
                };
                inner
                    .listeners
                    .entry((*event).to_string())
                    .or_default()
                    .push(record);
                registered.push(((*event).to_string(), id));
            }
        }

        // Hooks run with the registry borrow released so they may inspect
        // or mutate this emitter.
        let hooks: Vec<Rc<dyn Fn(&str)>> = self
            .inner
            .borrow()
            .new_listener_hooks
            .iter()
            .map(|h| h.callback.clone())
            .collect();
        for (event, _) in &registered {
            for hook in &hooks {
                hook(event);
            }
        }

        let weak = Rc::downgrade(&self.inner);
        EventHandle::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.borrow_mut();
                for (event, id) in &registered {
                    inner.remove_by_id(event, *id);
                }
            }
        })
    }

    /// Wrap `listener` so the record removes itself after `times` calls.
    fn countdown_wrapper(
        &self,
        listener: Listener<P>,
        event: String,
        id: u64,
        times: usize,
    ) -> Listener<P> {
        let weak = Rc::downgrade(&self.inner);
        let remaining = Cell::new(times);
        Rc::new(move |scope: &EventScope<'_, P>| {
            listener(scope);
            let left = remaining.get().saturating_sub(1);
            remaining.set(left);
            if left == 0
                && let Some(inner) = weak.upgrade()
            {
                inner.borrow_mut().remove_by_id(&event, id);
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
