#![forbid(unsafe_code)]

//! Trellis: a reactive component toolkit.
//!
//! One facade over the three layers:
//!
//! - [`events`]: the emitter family (typed payloads, default listeners,
//!   facades, handles, lazy proxying).
//! - [`state`]: the reactive key/value container (validators, setters,
//!   write-once keys, synchronous per-key events plus one coalesced batch
//!   per tick).
//! - [`component`]: the lifecycle consumer (render/attach/detach/dispose,
//!   renderer seam, DOM-event proxying).
//!
//! The [`prelude`] pulls in the names nearly every host needs.

pub use trellis_component as component;
pub use trellis_events as events;
pub use trellis_state as state;

pub mod prelude {
    pub use trellis_component::{
        Attach, Component, ComponentConfig, ComponentDef, Element, LifecyclePhase, Renderer,
    };
    pub use trellis_events::{EventArgs, EventEmitter, EventHandle, EventHandler};
    pub use trellis_state::{
        BatchChange, Scheduler, State, StateKeyConfig, TickQueue, Validation, STATE_CHANGED,
        STATE_KEY_CHANGED,
    };
}
