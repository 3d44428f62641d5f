#![forbid(unsafe_code)]

//! The component lifecycle state machine.
//!
//! # Design
//!
//! [`Component`] is a cheap-clone handle over one shared record holding the
//! lifecycle phase, the element, the [`DataManager`], the component's own
//! [`EventEmitter`], and the boxed [`Renderer`]. Internal state listeners
//! capture only a `Weak` back-reference, so dropping every handle tears the
//! component down without an explicit `dispose` call.
//!
//! # Lifecycle
//!
//! `Constructed → Rendering → Rendered`, then `Attached ⇄ Detached`, then
//! `Disposed`. The first render pass runs the renderer's `render` once and
//! fires `"render"`; each later flushed changeset runs `update`. Attach and
//! detach are idempotent and fire `"attached"` / `"detached"`.
//!
//! # Update paths
//!
//! By default the component listens to the batched `"stateChanged"` event:
//! any number of same-tick writes costs one `update` call. Opting into
//! synchronous updates switches the subscription to `"stateKeyChanged"`,
//! one `update` per observable write. Skip mode suppresses both without
//! replaying what was missed.
//!
//! # Failure modes
//!
//! Operations on a disposed component warn and return. Rendering without a
//! renderer-produced element leaves the component detachable-only; `attach`
//! warns. Renderer panics propagate to the caller that triggered the pass.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use trellis_events::{
    EventArgs, EventEmitter, EventEmitterProxy, EventHandle, EventHandler, Listener,
};
use trellis_state::{
    BatchChange, ChangeRecord, KeyChange, Scheduler, StateError, StateKeyConfig, STATE_CHANGED,
    STATE_KEY_CHANGED,
};

use crate::data_manager::DataManager;
use crate::element::Element;
use crate::renderer::Renderer;

/// Fired once, after the first render pass completes.
pub const RENDER_EVENT: &str = "render";
/// Fired when the element enters a parent.
pub const ATTACHED_EVENT: &str = "attached";
/// Fired when the element leaves its parent.
pub const DETACHED_EVENT: &str = "detached";

/// Component-emitted lifecycle names; never proxied from the element, so a
/// native event cannot spoof them.
const LIFECYCLE_EVENTS: &[&str] = &[RENDER_EVENT, ATTACHED_EVENT, DETACHED_EVENT];

/// Per-key synchronization handler: `(component, new_val, prev_val)`.
pub type SyncFn = Rc<dyn Fn(&Component, &Value, &Value)>;

/// Where [`Component::render`] should place the element afterwards.
#[derive(Clone, Copy)]
pub enum Attach<'a> {
    /// The construction-time default parent, or nowhere if none was given.
    Default,
    /// Append into `parent`.
    Into(&'a Element),
    /// Insert into the first element, before the second.
    Before(&'a Element, &'a Element),
    /// Render without attaching.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Constructed,
    Rendering,
    Rendered,
    Attached,
    Detached,
    Disposed,
}

/// Per-type definition: the state key table, shared sync handlers, and the
/// post-construction hook. Built once and shared across instances.
pub struct ComponentDef {
    name: String,
    keys: HashMap<String, StateKeyConfig>,
    sync_handlers: HashMap<String, SyncFn>,
    created: Option<Rc<dyn Fn(&Component)>>,
}

impl ComponentDef {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: HashMap::new(),
            sync_handlers: HashMap::new(),
            created: None,
        }
    }

    #[must_use]
    pub fn with_key(mut self, name: impl Into<String>, config: StateKeyConfig) -> Self {
        self.keys.insert(name.into(), config);
        self
    }

    /// Shared handler run for `key` on first render and after each of its
    /// accepted changes. Instance-level handlers take precedence.
    #[must_use]
    pub fn with_sync_handler(
        mut self,
        key: impl Into<String>,
        handler: impl Fn(&Component, &Value, &Value) + 'static,
    ) -> Self {
        self.sync_handlers.insert(key.into(), Rc::new(handler));
        self
    }

    /// Hook run once the instance is wired up, before the first render.
    #[must_use]
    pub fn with_created(mut self, hook: impl Fn(&Component) + 'static) -> Self {
        self.created = Some(Rc::new(hook));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for ComponentDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDef")
            .field("name", &self.name)
            .field("keys", &self.keys.len())
            .field("sync_handlers", &self.sync_handlers.len())
            .finish()
    }
}

/// Per-instance construction options.
pub struct ComponentConfig {
    pub initial_values: Vec<(String, Value)>,
    /// Subscribe to per-key events instead of the per-tick batch.
    pub sync_updates: bool,
    /// Run the first render pass during construction.
    pub render_on_construct: bool,
    /// Target for [`Attach::Default`].
    pub parent: Option<Element>,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            initial_values: Vec::new(),
            sync_updates: false,
            render_on_construct: true,
            parent: None,
        }
    }
}

struct ComponentInner {
    def: Rc<ComponentDef>,
    phase: LifecyclePhase,
    element: Option<Element>,
    default_parent: Option<Element>,
    in_document: bool,
    was_rendered: bool,
    skip_updates: bool,
    disposed: bool,
    renderer: Option<Box<dyn Renderer>>,
    instance_sync: HashMap<String, SyncFn>,
    data: DataManager,
    events: EventEmitter<EventArgs>,
    dom_proxy: Option<Rc<EventEmitterProxy<EventArgs>>>,
    handles: EventHandler,
}

/// Shared handle to one component instance.
pub struct Component {
    inner: Rc<RefCell<ComponentInner>>,
}

impl Clone for Component {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Component")
            .field("name", &inner.def.name)
            .field("phase", &inner.phase)
            .field("in_document", &inner.in_document)
            .finish()
    }
}

impl Component {
    /// Construct and wire up an instance: state container with the def's
    /// keys plus any renderer-contributed ones, DOM-event proxy, change
    /// subscription, `created` hook, and (by default) the first render.
    pub fn new(
        def: Rc<ComponentDef>,
        renderer: Box<dyn Renderer>,
        config: ComponentConfig,
        scheduler: Rc<dyn Scheduler>,
    ) -> Result<Self, StateError> {
        let mut metadata = Map::new();
        metadata.insert("component".to_string(), json!(def.name));
        let data = DataManager::new(
            scheduler,
            def.keys.clone(),
            config.initial_values,
            metadata,
        )?;

        let events = EventEmitter::new();
        events.set_should_use_facade(true);
        let dom_proxy = Rc::new(EventEmitterProxy::new(
            None,
            events.clone(),
            LIFECYCLE_EVENTS,
            None,
        ));

        let component = Self {
            inner: Rc::new(RefCell::new(ComponentInner {
                def: Rc::clone(&def),
                phase: LifecyclePhase::Constructed,
                element: None,
                default_parent: config.parent,
                in_document: false,
                was_rendered: false,
                skip_updates: false,
                disposed: false,
                renderer: None,
                instance_sync: HashMap::new(),
                data: data.clone(),
                events,
                dom_proxy: Some(dom_proxy),
                handles: EventHandler::new(),
            })),
        };

        // The renderer gets a chance to contribute keys before it is stored.
        if let Some(extra) = renderer.extra_state_config(&component) {
            data.add_keys(extra)?;
        }
        component.inner.borrow_mut().renderer = Some(renderer);

        component.subscribe_changes(config.sync_updates);

        if let Some(hook) = def.created.clone() {
            hook(&component);
        }
        if config.render_on_construct {
            component.render(Attach::Default);
        }
        Ok(component)
    }

    fn from_weak(weak: &Weak<RefCell<ComponentInner>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn subscribe_changes(&self, sync_updates: bool) {
        let weak = Rc::downgrade(&self.inner);
        let state_events = self.inner.borrow().data.events();
        let handle = if sync_updates {
            state_events.on(
                STATE_KEY_CHANGED,
                Rc::new(move |scope| {
                    if let Some(component) = Component::from_weak(&weak)
                        && let Some(change) = scope.payload().as_key()
                    {
                        component.handle_key_change(change);
                    }
                }),
            )
        } else {
            state_events.on(
                STATE_CHANGED,
                Rc::new(move |scope| {
                    if let Some(component) = Component::from_weak(&weak)
                        && let Some(batch) = scope.payload().as_batch()
                    {
                        component.handle_batch(batch);
                    }
                }),
            )
        };
        self.inner.borrow_mut().handles.add(handle);
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn name(&self) -> String {
        self.inner.borrow().def.name.clone()
    }

    #[must_use]
    pub fn phase(&self) -> LifecyclePhase {
        self.inner.borrow().phase
    }

    #[must_use]
    pub fn element(&self) -> Option<Element> {
        self.inner.borrow().element.clone()
    }

    #[must_use]
    pub fn in_document(&self) -> bool {
        self.inner.borrow().in_document
    }

    #[must_use]
    pub fn was_rendered(&self) -> bool {
        self.inner.borrow().was_rendered
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.borrow().disposed
    }

    /// The component's own event surface. Element events the surface
    /// listens for are proxied onto it.
    #[must_use]
    pub fn events(&self) -> EventEmitter<EventArgs> {
        self.inner.borrow().events.clone()
    }

    /// The component's state container.
    #[must_use]
    pub fn data(&self) -> DataManager {
        self.inner.borrow().data.clone()
    }

    /// Listen on the component surface. Adding a listener for a
    /// non-lifecycle event starts proxying it from the element.
    pub fn on(&self, event: &str, listener: Listener<EventArgs>) -> EventHandle {
        self.events().on(event, listener)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.data().get(name)
    }

    pub fn set(&self, name: &str, value: Value) {
        self.data().set(name, value);
    }

    pub fn set_state<K: AsRef<str>>(&self, values: impl IntoIterator<Item = (K, Value)>) {
        self.data().set_state(values);
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    /// Run the first render pass if it has not happened yet, then place the
    /// element per `attach`. Safe to call repeatedly; only the placement
    /// repeats.
    pub fn render(&self, attach: Attach<'_>) {
        if self.is_disposed() {
            warn!(component = %self.name(), "render on disposed component");
            return;
        }
        let first = {
            let mut inner = self.inner.borrow_mut();
            if inner.was_rendered {
                false
            } else {
                inner.phase = LifecyclePhase::Rendering;
                true
            }
        };
        if first {
            if let Some(mut renderer) = self.take_renderer() {
                renderer.render(self);
                self.restore_renderer(renderer);
            }
            // Renderers that defer completion call inform_rendered
            // themselves; cover the common synchronous case here.
            if !self.was_rendered() {
                self.inform_rendered();
            }
        }
        match attach {
            Attach::Skip => {}
            Attach::Into(parent) => self.attach(parent, None),
            Attach::Before(parent, sibling) => self.attach(parent, Some(sibling)),
            Attach::Default => {
                let parent = self.inner.borrow().default_parent.clone();
                if let Some(parent) = parent {
                    self.attach(&parent, None);
                }
            }
        }
    }

    /// Mark the first render pass complete: fires `"render"` once, then
    /// runs every registered sync handler with the key's current value.
    pub fn inform_rendered(&self) {
        let first = {
            let mut inner = self.inner.borrow_mut();
            if inner.disposed {
                return;
            }
            let first = !inner.was_rendered;
            inner.was_rendered = true;
            if inner.phase == LifecyclePhase::Rendering {
                inner.phase = LifecyclePhase::Rendered;
            }
            first
        };
        if !first {
            return;
        }
        self.events().emit(RENDER_EVENT, Vec::new());
        for name in self.data().key_names() {
            let value = self.get(&name).unwrap_or(Value::Null);
            self.run_sync_handler(&name, &value, &Value::Null);
        }
    }

    /// Swap the component's element and re-point DOM-event proxying at it.
    /// Already-proxied event names survive the swap.
    pub fn set_element(&self, element: Option<Element>) {
        let proxy = {
            let mut inner = self.inner.borrow_mut();
            if inner.disposed {
                return;
            }
            inner.element = element.clone();
            inner.dom_proxy.clone()
        };
        if let Some(proxy) = proxy {
            proxy.set_origin_emitter(element.map(|el| el.events()));
        }
    }

    // -----------------------------------------------------------------------
    // Attachment
    // -----------------------------------------------------------------------

    /// Insert the element under `parent` (before `sibling` when given) and
    /// fire `"attached"`. No-op while already attached.
    pub fn attach(&self, parent: &Element, sibling: Option<&Element>) {
        if self.is_disposed() {
            warn!(component = %self.name(), "attach on disposed component");
            return;
        }
        let element = {
            let inner = self.inner.borrow();
            if inner.in_document {
                return;
            }
            inner.element.clone()
        };
        let Some(element) = element else {
            warn!(component = %self.name(), "attach before an element was rendered");
            return;
        };
        parent.insert_before(&element, sibling);
        {
            let mut inner = self.inner.borrow_mut();
            inner.in_document = true;
            inner.phase = LifecyclePhase::Attached;
        }
        self.events()
            .emit(ATTACHED_EVENT, vec![json!({ "parent": parent.tag() })]);
    }

    /// Remove the element from its parent and fire `"detached"`. No-op
    /// while not attached.
    pub fn detach(&self) {
        let element = {
            let inner = self.inner.borrow();
            if !inner.in_document {
                return;
            }
            inner.element.clone()
        };
        if let Some(element) = &element
            && let Some(parent) = element.parent()
        {
            parent.remove_child(element);
        }
        {
            let mut inner = self.inner.borrow_mut();
            inner.in_document = false;
            if !inner.disposed {
                inner.phase = LifecyclePhase::Detached;
            }
        }
        self.events().emit(DETACHED_EVENT, Vec::new());
    }

    // -----------------------------------------------------------------------
    // Update control
    // -----------------------------------------------------------------------

    /// Suppress renderer updates and sync handlers. Changes made while
    /// skipping are not replayed on resume.
    pub fn start_skip_updates(&self) {
        self.inner.borrow_mut().skip_updates = true;
    }

    pub fn stop_skip_updates(&self) {
        self.inner.borrow_mut().skip_updates = false;
    }

    /// Instance-level sync handler for `key`; shadows the def-level one.
    pub fn add_sync_handler(
        &self,
        key: impl Into<String>,
        handler: impl Fn(&Component, &Value, &Value) + 'static,
    ) {
        self.inner
            .borrow_mut()
            .instance_sync
            .insert(key.into(), Rc::new(handler));
    }

    fn should_update(&self) -> bool {
        let inner = self.inner.borrow();
        !inner.disposed && inner.was_rendered && !inner.skip_updates
    }

    fn handle_batch(&self, batch: &BatchChange) {
        if !self.should_update() {
            return;
        }
        if let Some(mut renderer) = self.take_renderer() {
            renderer.update(self, batch);
            self.restore_renderer(renderer);
        }
        for (key, record) in &batch.changes {
            self.run_sync_handler(key, &record.new_val, &record.prev_val);
        }
    }

    fn handle_key_change(&self, change: &KeyChange) {
        if !self.should_update() {
            return;
        }
        let single = BatchChange {
            changes: BTreeMap::from([(
                change.key.clone(),
                ChangeRecord {
                    new_val: change.new_val.clone(),
                    prev_val: change.prev_val.clone(),
                },
            )]),
            metadata: change.metadata.clone(),
        };
        if let Some(mut renderer) = self.take_renderer() {
            renderer.update(self, &single);
            self.restore_renderer(renderer);
        }
        self.run_sync_handler(&change.key, &change.new_val, &change.prev_val);
    }

    fn run_sync_handler(&self, key: &str, new_val: &Value, prev_val: &Value) {
        let handler = {
            let inner = self.inner.borrow();
            inner
                .instance_sync
                .get(key)
                .or_else(|| inner.def.sync_handlers.get(key))
                .cloned()
        };
        if let Some(handler) = handler {
            handler(self, new_val, prev_val);
        }
    }

    /// The renderer leaves its slot while running so it can re-enter the
    /// component freely. A nested pass observing an empty slot is skipped.
    fn take_renderer(&self) -> Option<Box<dyn Renderer>> {
        let taken = self.inner.borrow_mut().renderer.take();
        if taken.is_none() {
            debug!(component = %self.name(), "renderer pass skipped; renderer busy or absent");
        }
        taken
    }

    fn restore_renderer(&self, renderer: Box<dyn Renderer>) {
        let mut inner = self.inner.borrow_mut();
        if !inner.disposed {
            inner.renderer = Some(renderer);
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Detach, then tear everything down: internal subscriptions, the DOM
    /// proxy, the state container, and the component emitter. Idempotent.
    pub fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        self.detach();
        let (data, events, proxy) = {
            let mut inner = self.inner.borrow_mut();
            inner.disposed = true;
            inner.phase = LifecyclePhase::Disposed;
            inner.renderer = None;
            inner.element = None;
            inner.default_parent = None;
            inner.handles.remove_all_listeners();
            (
                inner.data.clone(),
                inner.events.clone(),
                inner.dom_proxy.take(),
            )
        };
        if let Some(proxy) = proxy {
            proxy.dispose();
        }
        data.dispose();
        events.dispose();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
