#![forbid(unsafe_code)]

//! Component lifecycle for Trellis.
//!
//! # Role in Trellis
//! `trellis-component` is the consumer of the reactivity kernel: a
//! [`Component`] owns one [`State`](trellis_state::State) instance (through
//! a [`DataManager`] adapter), one [`Renderer`], and the
//! render/attach/detach/dispose lifecycle. Per state change it decides
//! whether to re-render synchronously (per-key events) or through the
//! batched per-tick path.
//!
//! # Primary responsibilities
//! - **Element**: minimal element-tree handle with `insert_before` /
//!   `remove_child` and its own event source, standing in for the real
//!   attach target.
//! - **Renderer**: the rendering seam; called with the component and the
//!   coalesced changeset.
//! - **DataManager**: wires the component's reserved-name blacklist and
//!   renderer-contributed keys into one `State`.
//! - **Component / ComponentDef**: lifecycle state machine, sync-handler
//!   tables, DOM-event proxying onto the component's own emitter.

pub mod component;
pub mod data_manager;
pub mod element;
pub mod renderer;

pub use component::{
    Attach, Component, ComponentConfig, ComponentDef, LifecyclePhase, SyncFn, ATTACHED_EVENT,
    DETACHED_EVENT, RENDER_EVENT,
};
pub use data_manager::{DataManager, RESERVED_COMPONENT_KEYS};
pub use element::Element;
pub use renderer::Renderer;
