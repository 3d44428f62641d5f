#![forbid(unsafe_code)]

//! Injectable "next tick" primitive used for batch emission.
//!
//! The batching algorithm needs exactly one capability: run a callback
//! after the current synchronous turn, in FIFO order. [`Scheduler`] models
//! that; [`TickQueue`] is the single-threaded production implementation, a
//! deferred-callback queue the host loop drains at its tick boundary.
//! Tests drain it explicitly, which makes batch timing fully deterministic.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

type Task = Box<dyn FnOnce()>;

/// A FIFO, same-turn-deferred callback mechanism.
pub trait Scheduler {
    /// Queue `task` to run after the current synchronous turn.
    fn schedule(&self, task: Task);
}

/// Shared deferred-callback queue. Cloning shares the same queue.
#[derive(Clone, Default)]
pub struct TickQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl TickQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks currently queued.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Run the oldest queued task, if any. Returns whether one ran.
    pub fn run_once(&self) -> bool {
        // Pop before running: the task may schedule more tasks.
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run queued tasks (including ones scheduled while draining) until
    /// the queue is empty. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_once() {
            ran += 1;
        }
        ran
    }
}

impl Scheduler for TickQueue {
    fn schedule(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

impl std::fmt::Debug for TickQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickQueue")
            .field("pending", &self.tasks.borrow().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
