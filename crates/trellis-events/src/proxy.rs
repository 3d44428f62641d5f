#![forbid(unsafe_code)]

//! Lazy event forwarding between two emitters.
//!
//! # Design
//!
//! An [`EventEmitterProxy`] re-emits events from an *origin* emitter on a
//! *target* emitter, but only for event names the target actually has
//! listeners for. It subscribes once to the target's new-listener hook and
//! attaches one forwarding listener on the origin per newly-listened,
//! eligible event name.
//!
//! # Invariants
//!
//! 1. An event name is forwarded at most once no matter how many listeners
//!    the target accumulates for it (idempotent attach).
//! 2. Eligibility: in the whitelist when one is given, never in the
//!    blacklist, not already proxied or pending. The default blacklist
//!    contains `"newListener"`.
//! 3. Re-pointing via [`set_origin_emitter`] preserves the full set of
//!    proxied *and* pending names; a `None` origin suspends forwarding
//!    (names are buffered), it does not destroy it.
//! 4. Disposal removes every forwarding subscription and the target hook.
//!
//! [`set_origin_emitter`]: EventEmitterProxy::set_origin_emitter

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::debug;

use crate::emitter::{EventEmitter, EventScope};
use crate::handle::EventHandle;

/// Event names never proxied regardless of caller-supplied lists.
const DEFAULT_BLACKLIST: &[&str] = &["newListener"];

struct ProxyInner<P> {
    origin: Option<EventEmitter<P>>,
    target: EventEmitter<P>,
    blacklist: HashSet<String>,
    whitelist: Option<HashSet<String>>,
    /// Forwarding subscriptions currently attached on the origin.
    proxied: HashMap<String, EventHandle>,
    /// Names that passed eligibility while the origin was `None`.
    pending: HashSet<String>,
    hook_handle: Option<EventHandle>,
    disposed: bool,
}

/// Forwards events from an origin emitter to a target emitter, attaching
/// lazily and surviving origin replacement.
pub struct EventEmitterProxy<P> {
    inner: Rc<RefCell<ProxyInner<P>>>,
}

impl<P> std::fmt::Debug for EventEmitterProxy<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("EventEmitterProxy")
            .field("proxied", &inner.proxied.len())
            .field("pending", &inner.pending.len())
            .field("has_origin", &inner.origin.is_some())
            .field("disposed", &inner.disposed)
            .finish()
    }
}

impl<P: Clone + 'static> EventEmitterProxy<P> {
    /// Create a proxy between `origin` and `target`.
    ///
    /// `origin` may start as `None`; eligible names are then buffered until
    /// [`set_origin_emitter`](Self::set_origin_emitter) supplies one.
    pub fn new(
        origin: Option<EventEmitter<P>>,
        target: EventEmitter<P>,
        blacklist: &[&str],
        whitelist: Option<&[&str]>,
    ) -> Self {
        let mut full_blacklist: HashSet<String> =
            DEFAULT_BLACKLIST.iter().map(|s| (*s).to_string()).collect();
        full_blacklist.extend(blacklist.iter().map(|s| (*s).to_string()));

        let inner = Rc::new(RefCell::new(ProxyInner {
            origin,
            target: target.clone(),
            blacklist: full_blacklist,
            whitelist: whitelist.map(|names| names.iter().map(|s| (*s).to_string()).collect()),
            proxied: HashMap::new(),
            pending: HashSet::new(),
            hook_handle: None,
            disposed: false,
        }));

        let weak = Rc::downgrade(&inner);
        let hook = target.on_new_listener(Rc::new(move |event: &str| {
            if let Some(inner) = weak.upgrade() {
                Self::observe(&inner, event);
            }
        }));
        inner.borrow_mut().hook_handle = Some(hook);

        Self { inner }
    }

    /// Start proxying `event` immediately, without waiting for the target
    /// to gain a listener. Idempotent; subject to the same eligibility rule.
    pub fn proxy_event(&self, event: &str) {
        Self::observe(&self.inner, event);
    }

    /// Whether a forwarding listener for `event` is currently attached.
    #[must_use]
    pub fn is_proxying(&self, event: &str) -> bool {
        self.inner.borrow().proxied.contains_key(event)
    }

    /// Names buffered while no origin is set.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.borrow().pending.len()
    }

    /// Re-point the proxy at a new origin emitter.
    ///
    /// Every forwarding subscription on the old origin is detached; the
    /// union of proxied and pending names is reattached on the new origin.
    /// A `None` origin suspends forwarding: the names stay buffered and
    /// come back when a real origin is supplied later. The target hook is
    /// left untouched.
    pub fn set_origin_emitter(&self, origin: Option<EventEmitter<P>>) {
        let names: Vec<String> = {
            let mut inner = self.inner.borrow_mut();
            if inner.disposed {
                return;
            }
            let mut names: Vec<String> = inner.proxied.keys().cloned().collect();
            names.extend(inner.pending.drain());
            for (_, handle) in inner.proxied.drain() {
                handle.remove_listener();
            }
            let suspended = origin.is_none();
            inner.origin = origin;
            if suspended {
                inner.pending.extend(names);
                return;
            }
            names
        };
        debug!(count = names.len(), "re-pointing proxy origin");
        for name in names {
            Self::attach_forwarding(&self.inner, &name);
        }
    }

    /// Detach every forwarding subscription and the target hook, and clear
    /// the proxied and pending sets.
    pub fn dispose(&self) {
        let (handles, hook) = {
            let mut inner = self.inner.borrow_mut();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            inner.pending.clear();
            let handles: Vec<EventHandle> =
                inner.proxied.drain().map(|(_, handle)| handle).collect();
            (handles, inner.hook_handle.take())
        };
        for handle in &handles {
            handle.remove_listener();
        }
        if let Some(hook) = hook {
            hook.remove_listener();
        }
    }

    /// React to `event` gaining its first target listener (or a manual
    /// `proxy_event` call): buffer it or attach a forwarding listener.
    fn observe(inner: &Rc<RefCell<ProxyInner<P>>>, event: &str) {
        {
            let mut guard = inner.borrow_mut();
            if !Self::eligible(&guard, event) {
                return;
            }
            if guard.origin.is_none() {
                guard.pending.insert(event.to_string());
                return;
            }
        }
        Self::attach_forwarding(inner, event);
    }

    /// Attach a forwarding listener for `event` on the current origin.
    /// Caller guarantees an origin is set and the name is eligible.
    fn attach_forwarding(inner: &Rc<RefCell<ProxyInner<P>>>, event: &str) {
        let (origin, target) = {
            let guard = inner.borrow();
            let Some(origin) = guard.origin.clone() else {
                return;
            };
            (origin, guard.target.clone())
        };
        let handle = origin.on(
            event,
            Rc::new(move |scope: &EventScope<'_, P>| {
                target.emit(scope.event_type(), scope.payload().clone());
            }),
        );
        inner
            .borrow_mut()
            .proxied
            .insert(event.to_string(), handle);
    }

    fn eligible(inner: &ProxyInner<P>, event: &str) -> bool {
        if inner.disposed
            || inner.blacklist.contains(event)
            || inner.proxied.contains_key(event)
            || inner.pending.contains(event)
        {
            return false;
        }
        match &inner.whitelist {
            Some(whitelist) => whitelist.contains(event),
            None => true,
        }
    }
}

impl<P> Drop for EventEmitterProxy<P> {
    fn drop(&mut self) {
        let (handles, hook) = {
            let mut inner = self.inner.borrow_mut();
            inner.disposed = true;
            inner.pending.clear();
            let handles: Vec<EventHandle> =
                inner.proxied.drain().map(|(_, handle)| handle).collect();
            (handles, inner.hook_handle.take())
        };
        for handle in &handles {
            handle.remove_listener();
        }
        if let Some(hook) = hook {
            hook.remove_listener();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
