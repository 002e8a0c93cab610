//! The typed task handle.

use super::Sim;
use crate::error::{Fault, TaskCancelled, TaskClosed};
use crate::kernel::record::{Completion, StoredTask, TaskRecord};
use crate::kernel::wake::WakeToken;
use crate::kernel::Handle;
use crate::notify::condition::{Cond, Enlisted, Predicate};
use crate::notify::Waiter;
use crate::tracing_compat::trace;
use crate::types::{ScopeId, TaskId, TaskState};
use core::fmt;
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

type ResultCell<T> = Rc<RefCell<Option<Result<T, Fault>>>>;

/// Condition that a completion has reached a terminal state.
///
/// Backs both [`Task::done`] and [`Scope::ended`](super::Scope::ended).
/// Completion is sticky, so the negated condition can never fire.
pub(crate) struct DonePred {
    pub(crate) completion: Rc<Completion>,
}

impl Predicate for DonePred {
    fn holds(&self, _rt: &Handle) -> bool {
        self.completion.state().is_terminal()
    }

    fn enlist(&self, _rt: &Handle, waiter: &Waiter, polarity: bool, enlisted: &mut Enlisted) {
        if polarity {
            enlisted.subscribe(self.completion.notify(), waiter);
        }
    }

    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "done")
    }
}

/// A concurrently running activity.
///
/// Created by [`Scope::spawn`](super::Scope::spawn) and its variants. The
/// handle observes the task's lifecycle ([`state`](Self::state),
/// [`done`](Self::done)), can request teardown ([`cancel`](Self::cancel)),
/// and retrieves the outcome with [`join`](Self::join). Dropping the handle
/// detaches it; the task keeps running under its scope.
pub struct Task<T> {
    id: Option<TaskId>,
    rt: Handle,
    completion: Rc<Completion>,
    cell: ResultCell<T>,
}

impl<T> Task<T> {
    /// The task's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.completion.state()
    }

    /// Condition that fires when the task stops running, by any means.
    #[must_use]
    pub fn done(&self) -> Cond {
        Cond::leaf(DonePred {
            completion: self.completion.clone(),
        })
    }

    /// Requests cancellation with the default reason.
    ///
    /// A task that has not started yet is terminated immediately; a running
    /// task observes [`TaskCancelled`](crate::TaskCancelled) at its next
    /// suspension point. Cancelling a finished task, or cancelling twice,
    /// is a no-op.
    pub fn cancel(&self) {
        self.cancel_with("task cancelled");
    }

    /// Requests cancellation with an explicit reason.
    pub fn cancel_with(&self, reason: &'static str) {
        if let Some(id) = self.id {
            crate::kernel::cancel_task(&self.rt, id, Fault::Cancelled(TaskCancelled { reason }));
        }
    }

    /// Waits for the task to finish and returns its outcome.
    ///
    /// Cancellation of the joined task surfaces here as the fault it was
    /// terminated with.
    pub async fn join(self, sim: &Sim) -> Result<T, Fault> {
        sim.wait(&self.done()).await?;
        let taken = self.cell.borrow_mut().take();
        match taken {
            Some(result) => result,
            None => match self.completion.fault() {
                Some(fault) => Err(fault),
                None => Err(Fault::Cancelled(TaskCancelled {
                    reason: "task result unavailable",
                })),
            },
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Creates a task record, wraps the activity future and schedules the
/// initial activation.
pub(crate) fn spawn_task<T, F, Fut>(
    rt: &Handle,
    scope: ScopeId,
    after: Option<f64>,
    volatile: bool,
    f: F,
) -> Task<T>
where
    F: FnOnce(Sim) -> Fut,
    Fut: Future<Output = Result<T, Fault>> + 'static,
    T: 'static,
{
    let completion = Rc::new(Completion::new());
    let cell: ResultCell<T> = Rc::new(RefCell::new(None));

    // Spawning into an already-released scope produces a stillborn task.
    if rt.borrow().scopes.get(scope.arena_index()).is_none() {
        completion.set_state(TaskState::Cancelled);
        completion.set_fault(Fault::Closed(TaskClosed));
        return Task {
            id: None,
            rt: rt.clone(),
            completion,
            cell,
        };
    }

    let (task_id, spawn_token) = {
        let mut core = rt.borrow_mut();
        let spawn_token = WakeToken::new();
        let index = core.tasks.insert(TaskRecord {
            stored: None,
            scope: Some(scope),
            volatile,
            pending: Vec::new(),
            completion: completion.clone(),
            spawn_token: spawn_token.clone(),
        });
        let id = TaskId::from_arena(index);
        if let Some(record) = core.scopes.get_mut(scope.arena_index()) {
            if volatile {
                record.volatiles.push(id);
            } else {
                record.children.push(id);
            }
        }
        (id, spawn_token)
    };

    // Build the activity future outside any kernel borrow; the closure may
    // touch the handle it receives.
    let sim = Sim::new(rt.clone(), task_id);
    let fut = f(sim);
    let rt_for_finish = rt.clone();
    let cell_for_finish = cell.clone();
    let wrapped = async move {
        let out = fut.await;
        let fault = out.as_ref().err().cloned();
        *cell_for_finish.borrow_mut() = Some(out);
        crate::kernel::finish_task(&rt_for_finish, task_id, fault);
    };

    {
        let mut core = rt.borrow_mut();
        if let Some(record) = core.tasks.get_mut(task_id.arena_index()) {
            record.stored = Some(StoredTask::new(wrapped));
        }
        match after {
            // Negative delays are treated as immediate.
            Some(delay) if delay > 0.0 => {
                let at = core.now.advanced_by(delay);
                core.schedule_task_at(at, task_id, spawn_token);
            }
            _ => {
                core.schedule_task(task_id, &spawn_token);
            }
        }
        trace!(task = %task_id, volatile, "task spawned");
    }

    Task {
        id: Some(task_id),
        rt: rt.clone(),
        completion,
        cell,
    }
}
