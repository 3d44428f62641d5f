#![forbid(unsafe_code)]

//! Change-event payloads emitted by [`State`](crate::State).
//!
//! Two delivery channels share one payload enum:
//!
//! - `"{key}Changed"` and [`STATE_KEY_CHANGED`] carry a [`KeyChange`] and
//!   fire synchronously inside the mutating call.
//! - [`STATE_CHANGED`] carries a [`BatchChange`] and fires once per tick
//!   with every change made in that tick, coalesced per key.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Generic per-key change event name; fires synchronously for every
/// accepted, observable write.
pub const STATE_KEY_CHANGED: &str = "stateKeyChanged";

/// Aggregated batch event name; fires once per tick.
pub const STATE_CHANGED: &str = "stateChanged";

/// Event name carrying the change of one specific key: `"{key}Changed"`.
#[must_use]
pub fn key_changed_event(key: &str) -> String {
    format!("{key}Changed")
}

/// One observable change of one key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyChange {
    pub key: String,
    pub new_val: Value,
    pub prev_val: Value,
    /// Host-supplied metadata merged into every emitted change event.
    pub metadata: Map<String, Value>,
}

/// Coalesced record of all changes one key saw within one tick:
/// `prev_val` from the first change, `new_val` from the last.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub new_val: Value,
    pub prev_val: Value,
}

/// All changes accumulated for one tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchChange {
    pub changes: BTreeMap<String, ChangeRecord>,
    pub metadata: Map<String, Value>,
}

/// Payload type for the state emitter.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    /// Synchronous per-key change (`"{key}Changed"`, `stateKeyChanged`).
    Key(KeyChange),
    /// Per-tick aggregated batch (`stateChanged`).
    Batch(BatchChange),
}

impl StateEvent {
    /// The per-key change, if this is a key event.
    #[must_use]
    pub fn as_key(&self) -> Option<&KeyChange> {
        match self {
            Self::Key(change) => Some(change),
            Self::Batch(_) => None,
        }
    }

    /// The batch, if this is a batch event.
    #[must_use]
    pub fn as_batch(&self) -> Option<&BatchChange> {
        match self {
            Self::Batch(batch) => Some(batch),
            Self::Key(_) => None,
        }
    }
}
