//! Exclusive lock with FIFO handoff.

use crate::cx::Sim;
use crate::error::{Fault, UsageError};
use crate::kernel::wake::WakeToken;
use crate::kernel::Handle;
use crate::notify::Waiter;
use crate::tracing_compat::trace;
use crate::types::TaskId;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

#[derive(Debug)]
struct LockState {
    owner: Option<TaskId>,
    waiters: VecDeque<Waiter>,
}

/// Mutually exclusive access for tasks.
///
/// Acquiring a free lock is synchronous; a held lock queues the task and
/// releases hand ownership to the head of the queue, first come first
/// served. The guard releases on drop, on every exit path including
/// cancellation. Re-acquiring a lock the task already holds is a usage
/// error.
///
/// ```ignore
/// let guard = lock.acquire(&sim).await?;
/// // exclusive section
/// drop(guard);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Lock {
    state: Rc<RefCell<LockState>>,
}

impl Default for LockState {
    fn default() -> Self {
        Self {
            owner: None,
            waiters: VecDeque::new(),
        }
    }
}

impl Lock {
    /// Creates an unowned lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an acquire would succeed without waiting.
    #[must_use]
    pub fn available(&self) -> bool {
        self.state.borrow().owner.is_none()
    }

    /// Acquires the lock, suspending until it is handed over.
    ///
    /// # Errors
    ///
    /// [`UsageError::RecursiveLock`] if this task already holds the lock;
    /// the wait queue makes a second acquisition a guaranteed deadlock.
    pub async fn acquire(&self, sim: &Sim) -> Result<LockGuard, Fault> {
        {
            let mut state = self.state.borrow_mut();
            match state.owner {
                None => {
                    state.owner = Some(sim.task());
                    return Ok(LockGuard {
                        state: self.state.clone(),
                        rt: sim.rt().clone(),
                    });
                }
                Some(owner) if owner == sim.task() => {
                    return Err(UsageError::RecursiveLock.into());
                }
                Some(_) => {}
            }
        }
        let token = WakeToken::new();
        self.state.borrow_mut().waiters.push_back(Waiter {
            task: sim.task(),
            token: token.clone(),
        });
        let pending = PendingAcquire {
            state: self.state.clone(),
            rt: sim.rt().clone(),
            task: sim.task(),
            token: token.clone(),
            armed: true,
        };
        crate::notify::Hibernate::new(sim.rt().clone(), sim.task(), token).await?;
        // Ownership was handed to us by the releasing task.
        let mut pending = pending;
        pending.armed = false;
        debug_assert_eq!(self.state.borrow().owner, Some(sim.task()));
        Ok(LockGuard {
            state: self.state.clone(),
            rt: sim.rt().clone(),
        })
    }
}

/// Releases the lock, handing it to the oldest live waiter.
fn release(state: &Rc<RefCell<LockState>>, rt: &Handle) {
    let mut state = state.borrow_mut();
    state.owner = None;
    let mut core = rt.borrow_mut();
    while let Some(waiter) = state.waiters.pop_front() {
        let task = waiter.task;
        if core.schedule_task(task, &waiter.token) {
            state.owner = Some(task);
            trace!(task = %task, "lock handed over");
            break;
        }
    }
}

/// Cleans up a cancelled acquisition: if ownership was already handed to
/// this task, pass it on; otherwise leave the queue.
struct PendingAcquire {
    state: Rc<RefCell<LockState>>,
    rt: Handle,
    task: TaskId,
    token: WakeToken,
    armed: bool,
}

impl Drop for PendingAcquire {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let designated = self.state.borrow().owner == Some(self.task);
        if designated {
            release(&self.state, &self.rt);
        } else {
            self.state
                .borrow_mut()
                .waiters
                .retain(|w| !w.token.ptr_eq(&self.token));
        }
    }
}

/// Scoped ownership of a [`Lock`]; releases on drop.
#[derive(Debug)]
pub struct LockGuard {
    state: Rc<RefCell<LockState>>,
    rt: Handle,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        release(&self.state, &self.rt);
    }
}
