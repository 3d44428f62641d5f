#![forbid(unsafe_code)]

//! Minimal element-tree handle.
//!
//! # Design
//!
//! [`Element`] is a cheap-clone handle over a shared node: a tag, an
//! ordered child list, a weak parent link, and an [`EventEmitter`] acting
//! as the node's event source. It is the attach target and event origin
//! the component lifecycle operates against; rendering backends map it to
//! whatever concrete surface they draw on.
//!
//! # Invariants
//!
//! 1. A node has at most one parent; inserting an already-parented node
//!    moves it (it is removed from its old parent first).
//! 2. Parent links are weak. Dropping every handle to a parent orphans its
//!    children instead of leaking the subtree.
//! 3. Identity is node identity: two handles compare equal iff they point
//!    at the same node, never by structural comparison.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use trellis_events::{EventArgs, EventEmitter};

struct ElementInner {
    tag: String,
    events: EventEmitter<EventArgs>,
    children: RefCell<Vec<Element>>,
    parent: RefCell<Weak<ElementInner>>,
}

/// Shared handle to one element node.
pub struct Element {
    inner: Rc<ElementInner>,
}

impl Clone for Element {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Element {}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("tag", &self.inner.tag)
            .field("children", &self.inner.children.borrow().len())
            .finish()
    }
}

impl Element {
    /// Create a detached node.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(ElementInner {
                tag: tag.into(),
                events: EventEmitter::new(),
                children: RefCell::new(Vec::new()),
                parent: RefCell::new(Weak::new()),
            }),
        }
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.inner.tag
    }

    /// The node's event source. Emitting on it simulates a native event
    /// originating at this node.
    #[must_use]
    pub fn events(&self) -> EventEmitter<EventArgs> {
        self.inner.events.clone()
    }

    #[must_use]
    pub fn parent(&self) -> Option<Element> {
        self.inner
            .parent
            .borrow()
            .upgrade()
            .map(|inner| Element { inner })
    }

    #[must_use]
    pub fn children(&self) -> Vec<Element> {
        self.inner.children.borrow().clone()
    }

    /// Insert `child` before `sibling`, or append when `sibling` is `None`
    /// or not a child of this node. An already-parented child is moved.
    pub fn insert_before(&self, child: &Element, sibling: Option<&Element>) {
        if let Some(old_parent) = child.parent() {
            old_parent.remove_child(child);
        }
        let mut children = self.inner.children.borrow_mut();
        let index = sibling
            .and_then(|s| children.iter().position(|c| c == s))
            .unwrap_or(children.len());
        children.insert(index, child.clone());
        *child.inner.parent.borrow_mut() = Rc::downgrade(&self.inner);
    }

    /// Append `child` as the last child.
    pub fn append_child(&self, child: &Element) {
        self.insert_before(child, None);
    }

    /// Detach `child` from this node. Returns whether it was a child.
    pub fn remove_child(&self, child: &Element) -> bool {
        let mut children = self.inner.children.borrow_mut();
        let Some(index) = children.iter().position(|c| c == child) else {
            return false;
        };
        children.remove(index);
        *child.inner.parent.borrow_mut() = Weak::new();
        true
    }

    /// Whether `other` is in this node's subtree (self excluded).
    #[must_use]
    pub fn contains(&self, other: &Element) -> bool {
        let mut cursor = other.parent();
        while let Some(node) = cursor {
            if node == *self {
                return true;
            }
            cursor = node.parent();
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
