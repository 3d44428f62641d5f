#![forbid(unsafe_code)]

//! Reactive state container for Trellis.
//!
//! # Role in Trellis
//! `trellis-state` is the reactivity kernel: a generic key/value store
//! whose keys carry validators, setters, default-value policies, and
//! write-once semantics, built directly on `trellis-events`. Every write
//! produces synchronous per-key events and feeds a coalesced per-tick
//! batch, without double- or under-notifying.
//!
//! # Primary responsibilities
//! - **StateKeyConfig / Validation**: static per-key configuration and the
//!   three-state validation result.
//! - **State**: key lifecycle, read/write pipeline, change detection, and
//!   batch scheduling.
//! - **Scheduler / TickQueue**: the injectable "next tick" primitive the
//!   batch path defers through.
//!
//! # Values
//! Keys hold [`serde_json::Value`]. The change-detection rule treats
//! arrays and objects as reference types: they always re-notify, because
//! in-place mutation cannot be detected by identity.

pub mod change;
pub mod config;
pub mod scheduler;
pub mod state;

pub use change::{
    key_changed_event, BatchChange, ChangeRecord, KeyChange, StateEvent, STATE_CHANGED,
    STATE_KEY_CHANGED,
};
pub use config::{SetterFn, StateError, StateKeyConfig, Validation, ValidatorFn, ValueFn};
pub use scheduler::{Scheduler, TickQueue};
pub use state::State;
