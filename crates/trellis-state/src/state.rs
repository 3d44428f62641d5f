#![forbid(unsafe_code)]

//! The reactive key/value container.
//!
//! # Design
//!
//! [`State`] owns a map of key configs ([`StateKeyConfig`]), a lazily
//! populated map of per-key runtime records, and an
//! [`EventEmitter<StateEvent>`]. It clone-shares its inner maps through
//! `Rc<RefCell<..>>` so batch-flush closures can hold a weak back-reference.
//!
//! # Key lifecycle
//!
//! A key's record moves `Uninitialized → Initializing → Initialized`
//! exactly once, on first read or first write, whichever comes first.
//! During `Initializing`, pending initial values and defaults are written
//! through the setter but never through the validator, and never emit
//! change events.
//!
//! # Notification contract
//!
//! One accepted, observable write emits `"{key}Changed"` then
//! `"stateKeyChanged"` synchronously, in that order, before the mutating
//! call returns; it also records into the per-tick batch, which the
//! scheduler flushes as a single `"stateChanged"` event. A key touched
//! several times in one tick keeps the `prev_val` of its first change and
//! the `new_val` of its last. Reference-typed previous values (arrays,
//! objects) always re-notify; primitives only notify on inequality.
//!
//! # Failure semantics
//!
//! Validator and setter closures are not guarded: a panic propagates to
//! the mutating caller. Missing-required and warn-validation conditions go
//! through `tracing` and never unwind. Writes on a disposed container are
//! warn-and-no-op.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use trellis_events::{EventEmitter, EventHandle, Listener};

use crate::change::{
    key_changed_event, BatchChange, ChangeRecord, KeyChange, StateEvent, STATE_CHANGED,
    STATE_KEY_CHANGED,
};
use crate::config::{StateError, StateKeyConfig, Validation};
use crate::scheduler::Scheduler;

/// Key names no host may configure.
const DEFAULT_BLACKLIST: &[&str] = &["state", "stateKey"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyLifecycle {
    Uninitialized,
    Initializing,
    Initialized,
}

/// Runtime record for one key; created lazily on first access.
struct KeyRecord {
    lifecycle: KeyLifecycle,
    value: Value,
    written: bool,
}

impl Default for KeyRecord {
    fn default() -> Self {
        Self {
            lifecycle: KeyLifecycle::Uninitialized,
            value: Value::Null,
            written: false,
        }
    }
}

struct StateInner {
    configs: HashMap<String, StateKeyConfig>,
    records: HashMap<String, KeyRecord>,
    /// Construction-supplied overrides, consumed exactly once per key.
    pending_initial: HashMap<String, Value>,
    blacklist: HashSet<String>,
    metadata: Map<String, Value>,
    batch: Option<BatchChange>,
    disposed: bool,
}

/// Reactive key/value store with per-key lifecycle, validation, and
/// dual-channel change notification.
pub struct State {
    inner: Rc<RefCell<StateInner>>,
    emitter: EventEmitter<StateEvent>,
    scheduler: Rc<dyn Scheduler>,
}

impl Clone for State {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            emitter: self.emitter.clone(),
            scheduler: Rc::clone(&self.scheduler),
        }
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("State")
            .field("keys", &inner.configs.len())
            .field("batch_pending", &inner.batch.is_some())
            .field("disposed", &inner.disposed)
            .finish()
    }
}

impl State {
    /// Create an empty container that defers batch flushes through
    /// `scheduler`.
    #[must_use]
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(StateInner {
                configs: HashMap::new(),
                records: HashMap::new(),
                pending_initial: HashMap::new(),
                blacklist: DEFAULT_BLACKLIST.iter().map(|s| (*s).to_string()).collect(),
                metadata: Map::new(),
                batch: None,
                disposed: false,
            })),
            emitter: EventEmitter::new(),
            scheduler,
        }
    }

    /// Shared handle to the change emitter.
    #[must_use]
    pub fn events(&self) -> EventEmitter<StateEvent> {
        self.emitter.clone()
    }

    /// Convenience: listen for the synchronous change event of one key.
    pub fn on_key_changed(&self, key: &str, listener: Listener<StateEvent>) -> EventHandle {
        self.emitter.on(&key_changed_event(key), listener)
    }

    /// Add names the container must refuse to configure.
    pub fn extend_blacklist(&self, names: &[&str]) {
        let mut inner = self.inner.borrow_mut();
        inner
            .blacklist
            .extend(names.iter().map(|s| (*s).to_string()));
    }

    /// Extra fields merged into every emitted change event.
    pub fn set_event_metadata(&self, metadata: Map<String, Value>) {
        self.inner.borrow_mut().metadata = metadata;
    }

    /// Supply construction-time initial values. Values for keys that are
    /// already configured are validated eagerly, exactly like values
    /// passed alongside [`configure_keys`](Self::configure_keys).
    pub fn set_initial_values(&self, values: impl IntoIterator<Item = (String, Value)>) {
        let configured: Vec<String> = {
            let mut inner = self.inner.borrow_mut();
            let mut configured = Vec::new();
            for (name, value) in values {
                if inner.configs.contains_key(&name) {
                    configured.push(name.clone());
                }
                inner.pending_initial.insert(name, value);
            }
            configured
        };
        for name in configured {
            self.vet_pending_initial(&name);
        }
    }

    /// Register key configurations.
    ///
    /// Fails fast on blacklisted names and on a name appearing twice in the
    /// same call (nothing from the call is applied). Re-registering an
    /// existing key in a *later* call replaces its config and keeps its
    /// runtime record: subclass-style overrides refresh the descriptor
    /// without resetting the value.
    pub fn configure_keys(
        &self,
        configs: impl IntoIterator<Item = (String, StateKeyConfig)>,
    ) -> Result<(), StateError> {
        let configs: Vec<(String, StateKeyConfig)> = configs.into_iter().collect();
        let added: Vec<String> = {
            let mut inner = self.inner.borrow_mut();
            let mut seen = HashSet::new();
            for (name, _) in &configs {
                if inner.blacklist.contains(name) {
                    return Err(StateError::ReservedKey(name.clone()));
                }
                if !seen.insert(name.as_str()) {
                    return Err(StateError::DuplicateKey(name.clone()));
                }
            }
            let mut added = Vec::with_capacity(configs.len());
            for (name, config) in configs {
                if config.required && !config.has_default() && !inner.pending_initial.contains_key(&name)
                {
                    error!(key = %name, "required state key has no initial or default value");
                }
                inner.configs.insert(name.clone(), config);
                added.push(name);
            }
            added
        };
        for name in &added {
            self.vet_pending_initial(name);
        }
        Ok(())
    }

    /// Register a single key, optionally with an initial value.
    pub fn add_key_to_state(
        &self,
        name: &str,
        config: StateKeyConfig,
        initial_value: Option<Value>,
    ) -> Result<(), StateError> {
        if let Some(value) = initial_value {
            self.inner
                .borrow_mut()
                .pending_initial
                .insert(name.to_string(), value);
        }
        self.configure_keys([(name.to_string(), config)])
    }

    /// Read a key. First access initializes it: the pending initial value
    /// is consumed, or the default is computed, both through the setter
    /// and neither through the validator.
    ///
    /// Returns `None` for unconfigured keys and on a disposed container;
    /// an initialized-but-unset key reads as `Value::Null`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        {
            let inner = self.inner.borrow();
            if inner.disposed {
                warn!(key = name, "get on disposed state");
                return None;
            }
            if !inner.configs.contains_key(name) {
                return None;
            }
        }
        self.initialize_key(name);
        let inner = self.inner.borrow();
        inner.records.get(name).map(|record| record.value.clone())
    }

    /// Write a key through the full pipeline: write-once guard, validator,
    /// setter, change detection, dual notification.
    pub fn set(&self, name: &str, value: Value) {
        let validator = {
            let inner = self.inner.borrow();
            if inner.disposed {
                warn!(key = name, "set on disposed state");
                return;
            }
            let Some(config) = inner.configs.get(name) else {
                warn!(key = name, "set on unconfigured state key");
                return;
            };
            let record = inner.records.get(name);
            if config.write_once && record.is_some_and(|r| r.written) {
                return;
            }
            // Writes made while the key is initializing (from value_fn or
            // setter re-entry) skip validation entirely.
            let initializing =
                record.is_some_and(|r| r.lifecycle == KeyLifecycle::Initializing);
            if initializing {
                None
            } else {
                config.validator.clone()
            }
        };

        if let Some(validator) = validator {
            match validator(&value, name) {
                Validation::Reject => return,
                Validation::AcceptWithWarning(message) => {
                    error!(key = name, %message, "state validator reported an error");
                }
                Validation::Accept => {}
            }
        }

        // Initializes the key if this is its very first touch, so prev_val
        // is the default (or initial) value, not garbage.
        let prev_val = self.get(name).unwrap_or(Value::Null);
        let new_val = self.apply_write(name, value);
        self.maybe_inform(name, prev_val, new_val);
    }

    /// Set several keys, each through the full pipeline.
    pub fn set_state<K: AsRef<str>>(&self, values: impl IntoIterator<Item = (K, Value)>) {
        for (name, value) in values {
            self.set(name.as_ref(), value);
        }
    }

    /// Like [`set_state`](Self::set_state), then invoke `callback` once
    /// when the batch these writes joined is flushed.
    ///
    /// When no batch ends up pending (every write rejected, unchanged, or
    /// on uninitialized keys) the callback is never invoked.
    pub fn set_state_then<K: AsRef<str>>(
        &self,
        values: impl IntoIterator<Item = (K, Value)>,
        callback: impl FnOnce(&BatchChange) + 'static,
    ) {
        self.set_state(values);
        if self.inner.borrow().batch.is_none() {
            return;
        }
        let slot = RefCell::new(Some(callback));
        let _handle = self.emitter.once(
            STATE_CHANGED,
            Rc::new(move |scope| {
                if let Some(batch) = scope.payload().as_batch()
                    && let Some(callback) = slot.borrow_mut().take()
                {
                    callback(batch);
                }
            }),
        );
    }

    /// Snapshot of every configured key, initializing them as needed.
    #[must_use]
    pub fn get_state(&self) -> BTreeMap<String, Value> {
        let names = self.key_names();
        names
            .into_iter()
            .filter_map(|name| self.get(&name).map(|value| (name, value)))
            .collect()
    }

    /// Sorted names of all configured keys.
    #[must_use]
    pub fn key_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.borrow().configs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `name` is configured.
    #[must_use]
    pub fn has_state_key(&self, name: &str) -> bool {
        self.inner.borrow().configs.contains_key(name)
    }

    /// Whether a value has ever been stored for `name` (defaults and
    /// initial values count once actually written).
    #[must_use]
    pub fn has_been_set(&self, name: &str) -> bool {
        self.inner
            .borrow()
            .records
            .get(name)
            .is_some_and(|record| record.written)
    }

    /// Drop a key: config, runtime record, and any unconsumed initial
    /// value. Reads return `None` afterwards; no event is emitted.
    pub fn remove_state_key(&self, name: &str) -> bool {
        let mut inner = self.inner.borrow_mut();
        inner.records.remove(name);
        inner.pending_initial.remove(name);
        inner.configs.remove(name).is_some()
    }

    /// Dispose the container: pending batches are dropped silently when
    /// their tick fires, listeners are released, and every subsequent
    /// operation is a warn-level no-op.
    pub fn dispose(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            inner.batch = None;
            inner.pending_initial.clear();
        }
        self.emitter.dispose();
    }

    /// Whether `dispose` has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.borrow().disposed
    }

    // -----------------------------------------------------------------------
    // Pipeline internals
    // -----------------------------------------------------------------------

    /// Eagerly validate a pending initial value for a configured key.
    /// Reject discards the value (the key falls through to its default);
    /// a warning keeps it, mirroring the write-time asymmetry.
    fn vet_pending_initial(&self, name: &str) {
        let work = {
            let inner = self.inner.borrow();
            match (inner.pending_initial.get(name), inner.configs.get(name)) {
                (Some(value), Some(config)) => {
                    config.validator.clone().map(|v| (value.clone(), v))
                }
                _ => None,
            }
        };
        let Some((value, validator)) = work else {
            return;
        };
        match validator(&value, name) {
            Validation::Reject => {
                debug!(key = name, "initial value rejected by validator; using default");
                self.inner.borrow_mut().pending_initial.remove(name);
            }
            Validation::AcceptWithWarning(message) => {
                error!(key = name, %message, "initial value flagged by validator; keeping it");
            }
            Validation::Accept => {}
        }
    }

    /// Move `name` from `Uninitialized` to `Initialized`, writing the
    /// pending initial value or the default along the way.
    fn initialize_key(&self, name: &str) {
        let pending = {
            let mut inner = self.inner.borrow_mut();
            let record = inner.records.entry(name.to_string()).or_default();
            if record.lifecycle != KeyLifecycle::Uninitialized {
                return;
            }
            record.lifecycle = KeyLifecycle::Initializing;
            inner.pending_initial.remove(name)
        };

        if let Some(value) = pending {
            self.apply_write(name, value);
        }

        let default_source = {
            let inner = self.inner.borrow();
            let written = inner.records.get(name).is_some_and(|r| r.written);
            if written {
                None
            } else {
                inner.configs.get(name).and_then(|config| {
                    config
                        .value
                        .clone()
                        .map(DefaultSource::Literal)
                        .or_else(|| config.value_fn.clone().map(DefaultSource::Computed))
                })
            }
        };
        match default_source {
            Some(DefaultSource::Literal(value)) => {
                self.apply_write(name, value);
            }
            Some(DefaultSource::Computed(value_fn)) => {
                // The closure may read other keys; no borrow is held here.
                let value = value_fn();
                self.apply_write(name, value);
            }
            None => {}
        }

        if let Some(record) = self.inner.borrow_mut().records.get_mut(name) {
            record.lifecycle = KeyLifecycle::Initialized;
        }
    }

    /// Store a value: setter transform, `written` mark, required re-check.
    /// No validation, no events; callers decide both.
    fn apply_write(&self, name: &str, value: Value) -> Value {
        let (setter, prev, required) = {
            let inner = self.inner.borrow();
            let config = &inner.configs[name];
            let prev = inner
                .records
                .get(name)
                .map_or(Value::Null, |record| record.value.clone());
            (config.setter.clone(), prev, config.required)
        };
        let new_val = match setter {
            Some(setter) => setter(value, &prev),
            None => value,
        };
        {
            let mut inner = self.inner.borrow_mut();
            let record = inner.records.entry(name.to_string()).or_default();
            record.value = new_val.clone();
            record.written = true;
        }
        // Required is enforced on every write, not just construction.
        if required && new_val.is_null() {
            error!(key = name, "required state key set to null");
        }
        new_val
    }

    /// Decide whether a write is observable and, if so, emit the two
    /// synchronous events and record into the per-tick batch.
    fn maybe_inform(&self, name: &str, prev_val: Value, new_val: Value) {
        let (should_inform, metadata) = {
            let inner = self.inner.borrow();
            let initialized = inner
                .records
                .get(name)
                .is_some_and(|r| r.lifecycle == KeyLifecycle::Initialized);
            // Arrays and objects may have been mutated in place without
            // changing identity, so they conservatively always re-notify.
            let reference_type = prev_val.is_array() || prev_val.is_object();
            (
                initialized && (reference_type || prev_val != new_val),
                inner.metadata.clone(),
            )
        };
        if !should_inform {
            return;
        }

        let change = KeyChange {
            key: name.to_string(),
            new_val: new_val.clone(),
            prev_val: prev_val.clone(),
            metadata,
        };
        self.emitter
            .emit(&key_changed_event(name), StateEvent::Key(change.clone()));
        self.emitter.emit(STATE_KEY_CHANGED, StateEvent::Key(change));

        self.record_batch_change(name, prev_val, new_val);
    }

    /// Append one change to the scheduled batch, scheduling the flush when
    /// this is the first change of the tick.
    fn record_batch_change(&self, name: &str, prev_val: Value, new_val: Value) {
        let newly_scheduled = {
            let mut inner = self.inner.borrow_mut();
            let newly_scheduled = inner.batch.is_none();
            let metadata = inner.metadata.clone();
            let batch = inner.batch.get_or_insert_with(|| BatchChange {
                changes: BTreeMap::new(),
                metadata,
            });
            match batch.changes.get_mut(name) {
                // Coalesce: keep the prev_val of the first change.
                Some(record) => record.new_val = new_val,
                None => {
                    batch.changes.insert(
                        name.to_string(),
                        ChangeRecord { new_val, prev_val },
                    );
                }
            }
            newly_scheduled
        };
        if !newly_scheduled {
            return;
        }

        let weak: Weak<RefCell<StateInner>> = Rc::downgrade(&self.inner);
        let emitter = self.emitter.clone();
        self.scheduler.schedule(Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let batch = {
                let mut inner = inner.borrow_mut();
                if inner.disposed {
                    // Disposed before the tick fired: drop silently.
                    inner.batch = None;
                    return;
                }
                inner.batch.take()
            };
            if let Some(batch) = batch {
                emitter.emit(STATE_CHANGED, StateEvent::Batch(batch));
            }
        }));
    }
}

enum DefaultSource {
    Literal(Value),
    Computed(crate::config::ValueFn),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TickQueue;
    use serde_json::json;
    use std::cell::Cell;

    fn state() -> (State, TickQueue) {
        let queue = TickQueue::new();
        (State::new(Rc::new(queue.clone())), queue)
    }

    fn plain_key() -> StateKeyConfig {
        StateKeyConfig::new()
    }

    fn count_events(state: &State, event: &str) -> Rc<Cell<u32>> {
        let count = Rc::new(Cell::new(0u32));
        let count_in = Rc::clone(&count);
        // The listener stays attached after the handle is dropped; removal
        // is explicit via EventHandle, never implicit via Drop.
        let _ = state
            .events()
            .on(event, Rc::new(move |_| count_in.set(count_in.get() + 1)));
        count
    }

    #[test]
    fn get_after_set_roundtrip() {
        let (state, _queue) = state();
        state.configure_keys([("count".to_string(), plain_key())]).unwrap();
        state.set("count", json!(7));
        assert_eq!(state.get("count"), Some(json!(7)));
    }

    #[test]
    fn unconfigured_key_reads_none() {
        let (state, _queue) = state();
        assert_eq!(state.get("ghost"), None);
        state.set("ghost", json!(1)); // warn-and-no-op
        assert_eq!(state.get("ghost"), None);
    }

    #[test]
    fn literal_default_applies_on_first_read() {
        let (state, _queue) = state();
        state
            .configure_keys([("mode".to_string(), plain_key().with_value(json!("idle")))])
            .unwrap();
        assert!(!state.has_been_set("mode"));
        assert_eq!(state.get("mode"), Some(json!("idle")));
        assert!(state.has_been_set("mode"));
    }

    #[test]
    fn computed_default_runs_once() {
        let (state, _queue) = state();
        let calls = Rc::new(Cell::new(0u32));
        let calls_in = Rc::clone(&calls);
        state
            .configure_keys([(
                "items".to_string(),
                plain_key().with_value_fn(move || {
                    calls_in.set(calls_in.get() + 1);
                    json!([])
                }),
            )])
            .unwrap();
        assert_eq!(state.get("items"), Some(json!([])));
        assert_eq!(state.get("items"), Some(json!([])));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn key_with_no_default_reads_null_unwritten() {
        let (state, _queue) = state();
        state.configure_keys([("bare".to_string(), plain_key())]).unwrap();
        assert_eq!(state.get("bare"), Some(Value::Null));
        assert!(!state.has_been_set("bare"));
    }

    #[test]
    fn initial_value_beats_default_and_is_consumed_once() {
        let (state, _queue) = state();
        state.set_initial_values([("mode".to_string(), json!("busy"))]);
        state
            .configure_keys([("mode".to_string(), plain_key().with_value(json!("idle")))])
            .unwrap();
        assert_eq!(state.get("mode"), Some(json!("busy")));
        state.set("mode", json!("other"));
        assert_eq!(state.get("mode"), Some(json!("other")));
    }

    #[test]
    fn rejected_initial_value_falls_through_to_default() {
        let (state, _queue) = state();
        state.set_initial_values([("n".to_string(), json!(-5))]);
        state
            .configure_keys([(
                "n".to_string(),
                plain_key()
                    .with_value(json!(0))
                    .with_validator(|value, _| {
                        if value.as_i64().is_some_and(|n| n >= 0) {
                            Validation::Accept
                        } else {
                            Validation::Reject
                        }
                    }),
            )])
            .unwrap();
        assert_eq!(state.get("n"), Some(json!(0)));
    }

    #[test]
    fn warned_initial_value_is_kept() {
        let (state, _queue) = state();
        state.set_initial_values([("n".to_string(), json!(-5))]);
        state
            .configure_keys([(
                "n".to_string(),
                plain_key()
                    .with_value(json!(0))
                    .with_validator(|_, _| {
                        Validation::AcceptWithWarning("suspicious".into())
                    }),
            )])
            .unwrap();
        assert_eq!(state.get("n"), Some(json!(-5)));
    }

    #[test]
    fn blacklisted_name_errors() {
        let (state, _queue) = state();
        let err = state
            .configure_keys([("state".to_string(), plain_key())])
            .unwrap_err();
        assert_eq!(err, StateError::ReservedKey("state".into()));

        state.extend_blacklist(&["element"]);
        assert!(state
            .configure_keys([("element".to_string(), plain_key())])
            .is_err());
    }

    #[test]
    fn duplicate_name_in_one_call_errors() {
        let (state, _queue) = state();
        let err = state
            .configure_keys([
                ("n".to_string(), plain_key().with_value(json!(1))),
                ("n".to_string(), plain_key().with_value(json!(2))),
            ])
            .unwrap_err();
        assert_eq!(err, StateError::DuplicateKey("n".into()));
        // Fail-fast: nothing from the call was applied.
        assert!(!state.has_state_key("n"));
    }

    #[test]
    fn write_once_ignores_later_writes() {
        let (state, _queue) = state();
        state
            .configure_keys([("id".to_string(), plain_key().write_once())])
            .unwrap();
        state.set("id", json!("first"));
        state.set("id", json!("second"));
        assert_eq!(state.get("id"), Some(json!("first")));
    }

    #[test]
    fn rejecting_validator_blocks_write_and_events() {
        let (state, queue) = state();
        state
            .configure_keys([(
                "n".to_string(),
                plain_key()
                    .with_value(json!(1))
                    .with_validator(|_, _| Validation::Reject),
            )])
            .unwrap();
        assert_eq!(state.get("n"), Some(json!(1)));

        let key_events = count_events(&state, "nChanged");
        let generic = count_events(&state, STATE_KEY_CHANGED);
        let batches = count_events(&state, STATE_CHANGED);

        state.set("n", json!(9));
        queue.run_until_idle();

        assert_eq!(state.get("n"), Some(json!(1)));
        assert_eq!(key_events.get(), 0);
        assert_eq!(generic.get(), 0);
        assert_eq!(batches.get(), 0);
    }

    #[test]
    fn warning_validator_logs_but_accepts() {
        let (state, _queue) = state();
        state
            .configure_keys([(
                "n".to_string(),
                plain_key().with_validator(|_, _| {
                    Validation::AcceptWithWarning("odd but allowed".into())
                }),
            )])
            .unwrap();
        state.set("n", json!(13));
        assert_eq!(state.get("n"), Some(json!(13)));
    }

    #[test]
    fn setter_transforms_user_writes_and_defaults() {
        let (state, _queue) = state();
        state
            .configure_keys([(
                "n".to_string(),
                plain_key()
                    .with_value(json!(2))
                    .with_setter(|incoming, _prev| {
                        json!(incoming.as_i64().unwrap_or(0) * 10)
                    }),
            )])
            .unwrap();
        // Default goes through the setter too.
        assert_eq!(state.get("n"), Some(json!(20)));
        state.set("n", json!(3));
        assert_eq!(state.get("n"), Some(json!(30)));
    }

    #[test]
    fn defaults_bypass_the_validator() {
        let (state, _queue) = state();
        state
            .configure_keys([(
                "n".to_string(),
                plain_key()
                    .with_value(json!(-1))
                    .with_validator(|_, _| Validation::Reject),
            )])
            .unwrap();
        // A rejecting validator must not block the default.
        assert_eq!(state.get("n"), Some(json!(-1)));
    }

    #[test]
    fn first_time_defaulting_never_emits() {
        let (state, queue) = state();
        state
            .configure_keys([("mode".to_string(), plain_key().with_value(json!("idle")))])
            .unwrap();
        let generic = count_events(&state, STATE_KEY_CHANGED);
        let batches = count_events(&state, STATE_CHANGED);

        assert_eq!(state.get("mode"), Some(json!("idle")));
        queue.run_until_idle();
        assert_eq!(generic.get(), 0);
        assert_eq!(batches.get(), 0);
    }

    #[test]
    fn first_write_emits_with_default_as_prev() {
        let (state, _queue) = state();
        state
            .configure_keys([("mode".to_string(), plain_key().with_value(json!("idle")))])
            .unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_in = Rc::clone(&seen);
        let _h = state.events().on(
            STATE_KEY_CHANGED,
            Rc::new(move |scope| {
                let change = scope.payload().as_key().unwrap().clone();
                seen_in.borrow_mut().push((change.prev_val, change.new_val));
            }),
        );

        // The key was never read; the write itself initializes it.
        state.set("mode", json!("busy"));
        assert_eq!(*seen.borrow(), vec![(json!("idle"), json!("busy"))]);
    }

    #[test]
    fn per_key_event_precedes_generic_event() {
        let (state, _queue) = state();
        state.configure_keys([("n".to_string(), plain_key().with_value(json!(0)))]).unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_a = Rc::clone(&log);
        let log_b = Rc::clone(&log);
        let _h1 = state
            .events()
            .on("nChanged", Rc::new(move |_| log_a.borrow_mut().push("specific")));
        let _h2 = state
            .events()
            .on(STATE_KEY_CHANGED, Rc::new(move |_| log_b.borrow_mut().push("generic")));

        state.set("n", json!(1));
        assert_eq!(*log.borrow(), vec!["specific", "generic"]);
    }

    #[test]
    fn primitive_same_value_write_is_silent() {
        let (state, queue) = state();
        state.configure_keys([("n".to_string(), plain_key().with_value(json!(5)))]).unwrap();
        assert_eq!(state.get("n"), Some(json!(5)));
        let generic = count_events(&state, STATE_KEY_CHANGED);

        state.set("n", json!(5));
        queue.run_until_idle();
        assert_eq!(generic.get(), 0);
    }

    #[test]
    fn reference_values_always_notify() {
        let (state, queue) = state();
        state
            .configure_keys([("items".to_string(), plain_key().with_value(json!([1])))])
            .unwrap();
        assert_eq!(state.get("items"), Some(json!([1])));
        let generic = count_events(&state, STATE_KEY_CHANGED);

        // Identical array: still informs, because the previous value is a
        // reference type.
        state.set("items", json!([1]));
        queue.run_until_idle();
        assert_eq!(generic.get(), 1);
    }

    #[test]
    fn batch_coalesces_same_tick_writes() {
        let (state, queue) = state();
        state
            .configure_keys([
                ("a".to_string(), plain_key().with_value(json!(0))),
                ("b".to_string(), plain_key().with_value(json!("x"))),
            ])
            .unwrap();
        assert_eq!(state.get("a"), Some(json!(0)));
        assert_eq!(state.get("b"), Some(json!("x")));

        let batches = Rc::new(RefCell::new(Vec::new()));
        let batches_in = Rc::clone(&batches);
        let _h = state.events().on(
            STATE_CHANGED,
            Rc::new(move |scope| {
                batches_in
                    .borrow_mut()
                    .push(scope.payload().as_batch().unwrap().clone());
            }),
        );

        state.set("a", json!(1));
        state.set("a", json!(2));
        state.set("b", json!("y"));
        state.set("a", json!(3));
        assert!(batches.borrow().is_empty());

        queue.run_until_idle();
        {
            let batches = batches.borrow();
            assert_eq!(batches.len(), 1);
            let changes = &batches[0].changes;
            assert_eq!(changes.len(), 2);
            assert_eq!(changes["a"], ChangeRecord { new_val: json!(3), prev_val: json!(0) });
            assert_eq!(changes["b"], ChangeRecord { new_val: json!("y"), prev_val: json!("x") });
        }

        // A later tick starts a fresh batch.
        state.set("a", json!(4));
        queue.run_until_idle();
        assert_eq!(batches.borrow().len(), 2);
        assert_eq!(
            batches.borrow()[1].changes["a"],
            ChangeRecord { new_val: json!(4), prev_val: json!(3) }
        );
    }

    #[test]
    fn set_state_then_callback_fires_once_after_batch() {
        let (state, queue) = state();
        state
            .configure_keys([
                ("a".to_string(), plain_key().with_value(json!(0))),
                ("b".to_string(), plain_key().with_value(json!(0))),
            ])
            .unwrap();
        assert_eq!(state.get("a"), Some(json!(0)));
        assert_eq!(state.get("b"), Some(json!(0)));

        let order = Rc::new(RefCell::new(Vec::new()));
        let order_batch = Rc::clone(&order);
        let _h = state.events().on(
            STATE_CHANGED,
            Rc::new(move |_| order_batch.borrow_mut().push("batch")),
        );

        let order_cb = Rc::clone(&order);
        state.set_state_then(
            [("a", json!(1)), ("b", json!(2))],
            move |batch: &BatchChange| {
                assert_eq!(batch.changes.len(), 2);
                order_cb.borrow_mut().push("callback");
            },
        );
        assert!(order.borrow().is_empty());

        queue.run_until_idle();
        assert_eq!(*order.borrow(), vec!["batch", "callback"]);
    }

    #[test]
    fn set_state_then_callback_skipped_when_nothing_changed() {
        let (state, queue) = state();
        state
            .configure_keys([(
                "n".to_string(),
                plain_key().with_value(json!(0)).with_validator(|_, _| Validation::Reject),
            )])
            .unwrap();
        assert_eq!(state.get("n"), Some(json!(0)));

        let called = Rc::new(Cell::new(false));
        let called_in = Rc::clone(&called);
        state.set_state_then([("n", json!(1))], move |_| called_in.set(true));
        queue.run_until_idle();
        assert!(!called.get());
    }

    #[test]
    fn writes_inside_key_listener_join_the_same_batch() {
        let (state, queue) = state();
        state
            .configure_keys([
                ("a".to_string(), plain_key().with_value(json!(0))),
                ("b".to_string(), plain_key().with_value(json!(0))),
            ])
            .unwrap();
        assert_eq!(state.get("a"), Some(json!(0)));
        assert_eq!(state.get("b"), Some(json!(0)));

        // Application code reacting to a key change inside its listener.
        let state_in = state.clone();
        let _h = state.events().on(
            "aChanged",
            Rc::new(move |_| state_in.set("b", json!(99))),
        );

        let batches = count_events(&state, STATE_CHANGED);
        state.set("a", json!(1));
        queue.run_until_idle();
        assert_eq!(batches.get(), 1);
        assert_eq!(state.get("b"), Some(json!(99)));
    }

    #[test]
    fn dispose_with_pending_batch_drops_it_silently() {
        let (state, queue) = state();
        state.configure_keys([("n".to_string(), plain_key().with_value(json!(0)))]).unwrap();
        assert_eq!(state.get("n"), Some(json!(0)));
        let batches = count_events(&state, STATE_CHANGED);

        state.set("n", json!(1));
        state.dispose();
        // The scheduled tick still fires; it must not emit or panic.
        queue.run_until_idle();
        assert_eq!(batches.get(), 0);
    }

    #[test]
    fn disposed_state_is_inert() {
        let (state, _queue) = state();
        state.configure_keys([("n".to_string(), plain_key().with_value(json!(0)))]).unwrap();
        state.dispose();
        assert!(state.is_disposed());
        assert_eq!(state.get("n"), None);
        state.set("n", json!(1)); // warn-and-no-op
        state.dispose(); // idempotent
    }

    #[test]
    fn remove_state_key_forgets_everything() {
        let (state, _queue) = state();
        state.configure_keys([("n".to_string(), plain_key().with_value(json!(1)))]).unwrap();
        assert_eq!(state.get("n"), Some(json!(1)));

        assert!(state.remove_state_key("n"));
        assert!(!state.has_state_key("n"));
        assert_eq!(state.get("n"), None);
        assert!(!state.remove_state_key("n"));
    }

    #[test]
    fn event_metadata_rides_on_both_channels() {
        let (state, queue) = state();
        state.configure_keys([("n".to_string(), plain_key().with_value(json!(0)))]).unwrap();
        assert_eq!(state.get("n"), Some(json!(0)));
        let mut metadata = Map::new();
        metadata.insert("origin".to_string(), json!("test"));
        state.set_event_metadata(metadata);

        let seen_key = Rc::new(RefCell::new(Map::new()));
        let seen_batch = Rc::new(RefCell::new(Map::new()));
        let seen_key_in = Rc::clone(&seen_key);
        let seen_batch_in = Rc::clone(&seen_batch);
        let _h1 = state.events().on(
            STATE_KEY_CHANGED,
            Rc::new(move |scope| {
                *seen_key_in.borrow_mut() = scope.payload().as_key().unwrap().metadata.clone();
            }),
        );
        let _h2 = state.events().on(
            STATE_CHANGED,
            Rc::new(move |scope| {
                *seen_batch_in.borrow_mut() =
                    scope.payload().as_batch().unwrap().metadata.clone();
            }),
        );

        state.set("n", json!(1));
        queue.run_until_idle();
        assert_eq!(seen_key.borrow().get("origin"), Some(&json!("test")));
        assert_eq!(seen_batch.borrow().get("origin"), Some(&json!("test")));
    }

    #[test]
    fn get_state_snapshot() {
        let (state, _queue) = state();
        state
            .configure_keys([
                ("a".to_string(), plain_key().with_value(json!(1))),
                ("b".to_string(), plain_key().with_value(json!("x"))),
            ])
            .unwrap();
        let snapshot = state.get_state();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["a"], json!(1));
        assert_eq!(snapshot["b"], json!("x"));
        assert_eq!(state.key_names(), vec!["a".to_string(), "b".to_string()]);
    }
}
