#![forbid(unsafe_code)]

//! The rendering seam.

use std::collections::HashMap;

use trellis_state::{BatchChange, StateKeyConfig};

use crate::component::Component;

/// Strategy a [`Component`] delegates drawing to.
///
/// `render` runs once per component lifetime, on the first render pass; it
/// is expected to build the component's element (via
/// [`Component::set_element`]) and finish with
/// [`Component::inform_rendered`]. `update` runs once per flushed change
/// batch afterwards.
pub trait Renderer {
    /// First render pass.
    fn render(&mut self, component: &Component);

    /// Incremental pass for one coalesced changeset.
    fn update(&mut self, component: &Component, changes: &BatchChange);

    /// Extra state keys this renderer needs on the component's container,
    /// merged in during construction. The default renderer needs none.
    fn extra_state_config(&self, component: &Component) -> Option<HashMap<String, StateKeyConfig>> {
        let _ = component;
        None
    }
}
