//! Task and scope records stored in the kernel arenas.

use crate::error::Fault;
use crate::kernel::signal::Signal;
use crate::kernel::wake::WakeToken;
use crate::notify::Notify;
use crate::types::{ScopeId, TaskId, TaskState};
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// A type-erased future stored in the kernel.
///
/// The future has been wrapped to deliver its typed result through a shared
/// cell and to report completion to the kernel, so its output type is erased
/// to `()`.
pub(crate) struct StoredTask {
    future: Pin<Box<dyn Future<Output = ()>>>,
    polls: u64,
}

impl StoredTask {
    pub(crate) fn new<F>(future: F) -> Self
    where
        F: Future<Output = ()> + 'static,
    {
        Self {
            future: Box::pin(future),
            polls: 0,
        }
    }

    pub(crate) fn poll(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        self.polls += 1;
        self.future.as_mut().poll(cx)
    }
}

impl core::fmt::Debug for StoredTask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StoredTask").field("polls", &self.polls).finish()
    }
}

/// Shared completion state of a task (or the `ended` marker of a scope).
///
/// Lives in an `Rc` held by both the kernel record and every public handle,
/// so the outcome stays readable after the record itself is released.
#[derive(Debug)]
pub(crate) struct Completion {
    state: Cell<TaskState>,
    fault: RefCell<Option<Fault>>,
    notify: Rc<Notify>,
}

impl Completion {
    pub(crate) fn new() -> Self {
        Self {
            state: Cell::new(TaskState::Created),
            fault: RefCell::new(None),
            notify: Rc::new(Notify::new()),
        }
    }

    pub(crate) fn state(&self) -> TaskState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.set(state);
    }

    pub(crate) fn fault(&self) -> Option<Fault> {
        self.fault.borrow().clone()
    }

    pub(crate) fn set_fault(&self, fault: Fault) {
        *self.fault.borrow_mut() = Some(fault);
    }

    pub(crate) fn notify(&self) -> &Rc<Notify> {
        &self.notify
    }
}

/// Kernel-side state of one task.
#[derive(Debug)]
pub(crate) struct TaskRecord {
    /// The suspended future, absent while being polled or once terminal.
    pub stored: Option<StoredTask>,
    /// Owning scope. The root tasks belong to the root scope.
    pub scope: Option<ScopeId>,
    /// Volatile children are force-terminated at scope teardown.
    pub volatile: bool,
    /// Signals awaiting the next suspension point.
    pub pending: Vec<Signal>,
    /// Shared lifecycle state and payload.
    pub completion: Rc<Completion>,
    /// Token of the initial activation, revoked if cancelled before start.
    pub spawn_token: WakeToken,
}

/// Kernel-side state of one scope.
#[derive(Debug)]
pub(crate) struct ScopeRecord {
    /// Task executing the scope body; `None` for the kernel's root scope.
    pub owner: Option<TaskId>,
    /// Non-volatile children in spawn order.
    pub children: Vec<TaskId>,
    /// Volatile children in spawn order.
    pub volatiles: Vec<TaskId>,
    /// Failures of children, in completion order.
    pub failures: Vec<Fault>,
    /// Set when the guard notification fired; children are being torn down.
    pub closing: bool,
    /// Set once the body finished and the exit phase began.
    pub ending: bool,
    /// Set after the owner has been signalled about a child failure.
    pub failing: bool,
    /// Fires when the body finishes, for children that await graceful end.
    pub ended: Rc<Completion>,
}

impl ScopeRecord {
    pub(crate) fn new(owner: Option<TaskId>) -> Self {
        Self {
            owner,
            children: Vec::new(),
            volatiles: Vec::new(),
            failures: Vec::new(),
            closing: false,
            ending: false,
            failing: false,
            ended: Rc::new(Completion::new()),
        }
    }
}
