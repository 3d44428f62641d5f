#![forbid(unsafe_code)]

//! Component-facing adapter over the state container.
//!
//! # Design
//!
//! [`DataManager`] owns the component's [`State`] and applies component
//! policy before handing it over: the reserved-name blacklist, component
//! metadata on every change event, the component's key table, and any
//! renderer-contributed keys. The read/write surface is a thin delegation;
//! the point of the type is that a [`Component`](crate::Component) never
//! configures a raw `State` itself.

use std::rc::Rc;

use serde_json::{Map, Value};
use trellis_events::EventEmitter;
use trellis_state::{Scheduler, State, StateError, StateEvent, StateKeyConfig};

/// Key names a component's state must refuse, because they collide with
/// component-level surface.
pub const RESERVED_COMPONENT_KEYS: &[&str] = &["element", "events", "wasRendered", "children"];

/// The component's state container plus the component policy wired into it.
#[derive(Clone)]
pub struct DataManager {
    state: State,
}

impl std::fmt::Debug for DataManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataManager")
            .field("state", &self.state)
            .finish()
    }
}

impl DataManager {
    /// Build the container: reserved names blacklisted, `metadata` merged
    /// into every change event, `initial_values` staged, `keys` configured.
    pub fn new(
        scheduler: Rc<dyn Scheduler>,
        keys: impl IntoIterator<Item = (String, StateKeyConfig)>,
        initial_values: impl IntoIterator<Item = (String, Value)>,
        metadata: Map<String, Value>,
    ) -> Result<Self, StateError> {
        let state = State::new(scheduler);
        state.extend_blacklist(RESERVED_COMPONENT_KEYS);
        state.set_event_metadata(metadata);
        state.set_initial_values(initial_values);
        state.configure_keys(keys)?;
        Ok(Self { state })
    }

    /// Merge renderer-contributed keys in after construction.
    pub fn add_keys(
        &self,
        keys: impl IntoIterator<Item = (String, StateKeyConfig)>,
    ) -> Result<(), StateError> {
        self.state.configure_keys(keys)
    }

    /// The underlying container, for callers that need the full surface.
    #[must_use]
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Shared handle to the state change emitter.
    #[must_use]
    pub fn events(&self) -> EventEmitter<StateEvent> {
        self.state.events()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.state.get(name)
    }

    pub fn set(&self, name: &str, value: Value) {
        self.state.set(name, value);
    }

    pub fn set_state<K: AsRef<str>>(&self, values: impl IntoIterator<Item = (K, Value)>) {
        self.state.set_state(values);
    }

    #[must_use]
    pub fn key_names(&self) -> Vec<String> {
        self.state.key_names()
    }

    #[must_use]
    pub fn has_been_set(&self, name: &str) -> bool {
        self.state.has_been_set(name)
    }

    pub fn dispose(&self) {
        self.state.dispose();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
