#![forbid(unsafe_code)]

//! Event emission substrate for Trellis.
//!
//! # Role in Trellis
//! `trellis-events` is the notification layer everything else is built on.
//! The reactive state container (`trellis-state`) and the component
//! lifecycle (`trellis-component`) both own [`EventEmitter`] instances and
//! communicate exclusively through them.
//!
//! # Primary responsibilities
//! - **EventEmitter**: per-instance listener registry with one-time and
//!   n-time listeners, wildcard (`"*"`) listeners, ordered default
//!   listeners, and an optional cancellation facade.
//! - **EventHandle / EventHandler**: unsubscribe tokens and bulk teardown.
//! - **EventEmitterProxy**: lazy forwarding of events from an origin
//!   emitter to a target emitter, re-pointable at runtime.
//!
//! # Threading model
//! Single-threaded, cooperative. Emitters clone-share their inner state via
//! `Rc<RefCell<..>>`; listeners may re-enter the emitter (register, remove,
//! emit) from inside a callback because emission always walks a snapshot of
//! the listener list.

pub mod emitter;
pub mod handle;
pub mod proxy;

pub use emitter::{EventArgs, EventEmitter, EventFacade, EventScope, Listener};
pub use handle::{EventHandle, EventHandler};
pub use proxy::EventEmitterProxy;
