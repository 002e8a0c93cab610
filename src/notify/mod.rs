//! Notification plumbing: waiter lists and the hibernation future.
//!
//! A [`Notify`] is a FIFO list of suspended waiters. Firing schedules every
//! current waiter exactly once into the turn queue, in subscription order,
//! and clears the list; a waiter subscribed during propagation is not woken
//! by that firing. Unsubscription is by token, and a token already sitting
//! in a queue is revoked instead of removed, which the queues skip lazily.

pub(crate) mod condition;

use crate::error::Fault;
use crate::kernel::wake::WakeToken;
use crate::kernel::{Core, Handle};
use crate::types::TaskId;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A suspended waiter: the task to resume and its wake token.
#[derive(Debug, Clone)]
pub(crate) struct Waiter {
    pub task: TaskId,
    pub token: WakeToken,
}

/// A FIFO list of waiters.
#[derive(Debug, Default)]
pub(crate) struct Notify {
    waiters: RefCell<SmallVec<[Waiter; 2]>>,
}

impl Notify {
    pub(crate) fn new() -> Self {
        Self {
            waiters: RefCell::new(SmallVec::new()),
        }
    }

    /// Appends a waiter. Order of subscription is order of wake-up.
    pub(crate) fn subscribe(&self, waiter: Waiter) {
        self.waiters.borrow_mut().push(waiter);
    }

    /// Removes the waiter carrying `token`, if still listed.
    pub(crate) fn unsubscribe(&self, token: &WakeToken) {
        self.waiters
            .borrow_mut()
            .retain(|w| !w.token.ptr_eq(token));
    }

    /// Wakes every current waiter, in subscription order.
    pub(crate) fn awake_all(&self, core: &mut Core) {
        let snapshot: SmallVec<[Waiter; 2]> = core::mem::take(&mut *self.waiters.borrow_mut());
        for waiter in snapshot {
            core.schedule_task(waiter.task, &waiter.token);
        }
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.waiters.borrow().len()
    }
}


/// The single suspension future.
///
/// Every wait in the kernel bottoms out here. Polling first surfaces any
/// pending signal as an `Err` (cancellation is observed only at suspension
/// points), then completes once the token has fired. Dropping the future
/// revokes the token, so stale queue entries are skipped.
#[derive(Debug)]
pub(crate) struct Hibernate {
    rt: Handle,
    task: TaskId,
    token: WakeToken,
}

impl Hibernate {
    pub(crate) fn new(rt: Handle, task: TaskId, token: WakeToken) -> Self {
        Self { rt, task, token }
    }
}

impl Future for Hibernate {
    type Output = Result<(), Fault>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let signal = this.rt.borrow_mut().take_signal(this.task);
        if let Some(signal) = signal {
            this.token.revoke();
            return Poll::Ready(Err(signal.into_fault()));
        }
        if this.token.fired() {
            Poll::Ready(Ok(()))
        } else {
            Poll::Pending
        }
    }
}

impl Drop for Hibernate {
    fn drop(&mut self) {
        self.token.revoke();
    }
}
