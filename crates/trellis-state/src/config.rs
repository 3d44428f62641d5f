#![forbid(unsafe_code)]

//! Per-key static configuration and the validation result type.
//!
//! # Validation is three-state, not boolean
//!
//! [`Validation::Reject`] drops the write silently; [`Validation::Accept`]
//! applies it; [`Validation::AcceptWithWarning`] logs an error **and still
//! applies the write**. Hosts rely on flagged writes landing anyway, so the
//! asymmetry is encoded in the type rather than left to a truthiness
//! convention.

use std::rc::Rc;

use serde_json::Value;

/// Computes a key's default value on first access.
pub type ValueFn = Rc<dyn Fn() -> Value>;

/// Transforms an incoming value before storage: `(incoming, previous)`.
pub type SetterFn = Rc<dyn Fn(Value, &Value) -> Value>;

/// Validates an incoming value: `(value, key_name)`.
pub type ValidatorFn = Rc<dyn Fn(&Value, &str) -> Validation>;

/// Result of running a key's validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// Apply the write.
    Accept,
    /// Drop the write silently: value unchanged, no events.
    Reject,
    /// Log an error with the given message, then apply the write anyway.
    AcceptWithWarning(String),
}

/// Static configuration for one reactive key.
///
/// Immutable after registration; re-registering the same key name replaces
/// the whole config (subclass override semantics).
#[derive(Clone, Default)]
pub struct StateKeyConfig {
    /// Literal default value, applied on first access if nothing was
    /// written by then.
    pub value: Option<Value>,
    /// Computed default; consulted only when `value` is absent.
    pub value_fn: Option<ValueFn>,
    /// Transform applied to every stored value, defaults included.
    pub setter: Option<SetterFn>,
    /// Validator applied to user-driven writes only (never to defaults or
    /// construction-time initial values at write time).
    pub validator: Option<ValidatorFn>,
    /// Log an error whenever the stored value is null.
    pub required: bool,
    /// Ignore every write after the first successful one.
    pub write_once: bool,
    /// Not exposed through host-facing surfaces (kept for renderers and
    /// other infrastructure keys).
    pub internal: bool,
}

impl StateKeyConfig {
    /// An empty config: no default, no validator, no setter, no flags.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the literal default value.
    #[must_use]
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Set the computed default.
    #[must_use]
    pub fn with_value_fn(mut self, value_fn: impl Fn() -> Value + 'static) -> Self {
        self.value_fn = Some(Rc::new(value_fn));
        self
    }

    /// Set the storage transform.
    #[must_use]
    pub fn with_setter(mut self, setter: impl Fn(Value, &Value) -> Value + 'static) -> Self {
        self.setter = Some(Rc::new(setter));
        self
    }

    /// Set the validator.
    #[must_use]
    pub fn with_validator(
        mut self,
        validator: impl Fn(&Value, &str) -> Validation + 'static,
    ) -> Self {
        self.validator = Some(Rc::new(validator));
        self
    }

    /// Mark the key required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark the key write-once.
    #[must_use]
    pub fn write_once(mut self) -> Self {
        self.write_once = true;
        self
    }

    /// Mark the key internal.
    #[must_use]
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    /// Whether a first access with no prior write would produce a default.
    #[must_use]
    pub fn has_default(&self) -> bool {
        self.value.is_some() || self.value_fn.is_some()
    }
}

impl std::fmt::Debug for StateKeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateKeyConfig")
            .field("value", &self.value)
            .field("has_value_fn", &self.value_fn.is_some())
            .field("has_setter", &self.setter.is_some())
            .field("has_validator", &self.validator.is_some())
            .field("required", &self.required)
            .field("write_once", &self.write_once)
            .field("internal", &self.internal)
            .finish()
    }
}

/// Structural misuse of the state container. These fail fast; data-shaped
/// problems (validation, missing required values) only log and continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The key name is reserved by the container or its host.
    ReservedKey(String),
    /// The same key name appeared twice in one registration call.
    DuplicateKey(String),
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReservedKey(name) => {
                write!(f, "state key name is reserved: {name:?}")
            }
            Self::DuplicateKey(name) => {
                write!(f, "state key configured twice in one call: {name:?}")
            }
        }
    }
}

impl std::error::Error for StateError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_sets_flags() {
        let config = StateKeyConfig::new()
            .with_value(json!(3))
            .required()
            .write_once()
            .internal();
        assert_eq!(config.value, Some(json!(3)));
        assert!(config.required && config.write_once && config.internal);
        assert!(config.has_default());
    }

    #[test]
    fn value_fn_counts_as_default() {
        let config = StateKeyConfig::new().with_value_fn(|| json!([1, 2]));
        assert!(config.has_default());
        assert!(StateKeyConfig::new().value_fn.is_none());
        assert!(!StateKeyConfig::new().has_default());
    }

    #[test]
    fn error_display() {
        let err = StateError::ReservedKey("state".into());
        assert!(err.to_string().contains("\"state\""));
    }
}
