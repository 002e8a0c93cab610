//! Scopes: structured concurrency regions.
//!
//! A scope owns the tasks spawned within it and exits only once every
//! non-volatile child is terminal. The exit protocol, in order of
//! precedence: a fatal fault passes straight through; a failure of the body
//! propagates unwrapped after children are wound down; failures of children
//! alone aggregate into one [`Concurrent`]. Volatile children never block
//! exit and are force-terminated at teardown.

use super::task::{spawn_task, DonePred};
use super::Sim;
use crate::error::{Concurrent, Fault, InterruptKind, TaskClosed, VolatileTaskClosed};
use crate::kernel::record::{ScopeRecord, StoredTask};
use crate::kernel::{self, Handle};
use crate::notify::condition::Cond;
use crate::tracing_compat::debug;
use crate::types::{ScopeId, TaskId};
use std::future::Future;

/// A structured-concurrency region for spawning child tasks.
///
/// Obtained from [`Sim::scope`] and [`Sim::until`]; cloneable, so children
/// can spawn siblings into the same region.
#[derive(Debug, Clone)]
pub struct Scope {
    rt: Handle,
    id: ScopeId,
}

impl Scope {
    pub(crate) fn create(sim: &Sim) -> Self {
        let id = {
            let mut core = sim.rt().borrow_mut();
            let index = core.scopes.insert(ScopeRecord::new(Some(sim.task())));
            ScopeId::from_arena(index)
        };
        Self {
            rt: sim.rt().clone(),
            id,
        }
    }

    /// Spawns a child activity at the current instant.
    pub fn spawn<T, F, Fut>(&self, f: F) -> super::Task<T>
    where
        F: FnOnce(Sim) -> Fut,
        Fut: Future<Output = Result<T, Fault>> + 'static,
        T: 'static,
    {
        spawn_task(&self.rt, self.id, None, false, f)
    }

    /// Spawns a child activity after a delay. A non-positive delay is
    /// treated as immediate.
    pub fn spawn_after<T, F, Fut>(&self, after: f64, f: F) -> super::Task<T>
    where
        F: FnOnce(Sim) -> Fut,
        Fut: Future<Output = Result<T, Fault>> + 'static,
        T: 'static,
    {
        spawn_task(&self.rt, self.id, Some(after), false, f)
    }

    /// Spawns a volatile child: it does not block scope exit and is
    /// force-terminated with [`VolatileTaskClosed`](crate::VolatileTaskClosed)
    /// at teardown.
    pub fn spawn_volatile<T, F, Fut>(&self, f: F) -> super::Task<T>
    where
        F: FnOnce(Sim) -> Fut,
        Fut: Future<Output = Result<T, Fault>> + 'static,
        T: 'static,
    {
        spawn_task(&self.rt, self.id, None, true, f)
    }

    /// Condition that fires once the scope body has finished.
    ///
    /// Lets a child wind down gracefully together with its scope:
    ///
    /// ```ignore
    /// scope.spawn(|sim| async move {
    ///     sim.wait(&containing.ended()).await?;
    ///     Ok(())
    /// });
    /// ```
    #[must_use]
    pub fn ended(&self) -> Cond {
        let completion = {
            let core = self.rt.borrow();
            core.scopes
                .get(self.id.arena_index())
                .map(|record| record.ended.clone())
        };
        match completion {
            Some(completion) => Cond::leaf(DonePred { completion }),
            // The scope is gone; its end is long past.
            None => {
                let done = crate::kernel::record::Completion::new();
                done.set_state(crate::types::TaskState::Success);
                Cond::leaf(DonePred {
                    completion: std::rc::Rc::new(done),
                })
            }
        }
    }
}

/// Runs a scope body and the full exit protocol.
///
/// With a guard condition this is an `until` scope: a volatile watchdog
/// awaits the guard and flips the scope into closing when it fires.
/// Returns `Ok(None)` when the guard interrupted the body before it could
/// produce a value.
pub(crate) async fn run_scope<T, F, Fut>(
    sim: &Sim,
    guard: Option<Cond>,
    body: F,
) -> Result<Option<T>, Fault>
where
    F: FnOnce(Scope) -> Fut,
    Fut: Future<Output = Result<T, Fault>>,
{
    let scope = Scope::create(sim);
    if let Some(cond) = guard {
        let scope_id = scope.id;
        let _watchdog = scope.spawn_volatile(move |wsim: Sim| async move {
            wsim.wait(&cond).await?;
            kernel::fire_scope_guard(wsim.rt(), scope_id);
            Ok(())
        });
    }
    let body_result = body(scope.clone()).await;
    let result = close_scope(sim, &scope, body_result).await;
    release_scope(sim.rt(), scope.id);
    result
}

async fn close_scope<T>(
    sim: &Sim,
    scope: &Scope,
    body_result: Result<T, Fault>,
) -> Result<Option<T>, Fault> {
    mark_ending(sim.rt(), scope.id);
    match body_result {
        Ok(value) => match await_children(sim, scope).await {
            Ok(()) => {
                close_volatiles(sim.rt(), scope.id);
                let failures = take_failures(sim.rt(), scope.id);
                if failures.is_empty() {
                    Ok(Some(value))
                } else {
                    Err(Concurrent::new(failures).into())
                }
            }
            Err(fault) => on_interrupt(sim, scope, fault, Some(value)).await,
        },
        Err(fault) => on_interrupt(sim, scope, fault, None).await,
    }
}

/// Handles a fault observed by the scope owner, either out of the body or
/// while awaiting children.
async fn on_interrupt<T>(
    sim: &Sim,
    scope: &Scope,
    fault: Fault,
    value: Option<T>,
) -> Result<Option<T>, Fault> {
    let own = match &fault {
        Fault::Interrupt(si) if si.scope == scope.id => Some(si.kind),
        _ => None,
    };
    match own {
        Some(InterruptKind::Guard) => {
            debug!(scope = %scope.id, "scope guard fired, closing");
            let stashed = drain_children(sim, scope).await;
            close_volatiles(sim.rt(), scope.id);
            let failures = take_failures(sim.rt(), scope.id);
            if let Some(worse) = stashed {
                return Err(worse);
            }
            if failures.is_empty() {
                Ok(value)
            } else {
                Err(Concurrent::new(failures).into())
            }
        }
        Some(InterruptKind::ChildFailed) => {
            debug!(scope = %scope.id, "child failed, cancelling siblings");
            let stashed = drain_children(sim, scope).await;
            close_volatiles(sim.rt(), scope.id);
            let failures = take_failures(sim.rt(), scope.id);
            if let Some(worse) = stashed {
                return Err(worse);
            }
            Err(Concurrent::new(failures).into())
        }
        None => {
            // Body failure, or a teardown signal aimed at this task itself.
            // Children are wound down gracefully; the original fault
            // propagates unwrapped and child failures are discarded, unless
            // the drain surfaced something that outranks it.
            let stashed = drain_children(sim, scope).await;
            close_volatiles(sim.rt(), scope.id);
            match stashed {
                Some(worse) => Err(worse),
                None => Err(fault),
            }
        }
    }
}

/// Awaits every non-volatile child in spawn order. Children spawned while
/// waiting are picked up as the list grows.
async fn await_children(sim: &Sim, scope: &Scope) -> Result<(), Fault> {
    let mut index = 0;
    loop {
        let child = {
            let core = sim.rt().borrow();
            core.scopes
                .get(scope.id.arena_index())
                .and_then(|record| record.children.get(index).copied())
        };
        let Some(child) = child else { return Ok(()) };
        if let Some(done) = done_cond(sim.rt(), child) {
            sim.wait(&done).await?;
        }
        index += 1;
    }
}

/// Cancels all live non-volatile children with [`TaskClosed`] and waits for
/// each to reach a terminal state. Signals arriving while draining are
/// stashed; the highest-ranked one is returned for the caller to rethrow.
async fn drain_children(sim: &Sim, scope: &Scope) -> Option<Fault> {
    let mut stashed: Option<Fault> = None;
    loop {
        let pending: Vec<TaskId> = {
            let core = sim.rt().borrow();
            core.scopes
                .get(scope.id.arena_index())
                .map(|record| {
                    record
                        .children
                        .iter()
                        .copied()
                        .filter(|child| {
                            core.tasks
                                .get(child.arena_index())
                                .is_some_and(|t| !t.completion.state().is_terminal())
                        })
                        .collect()
                })
                .unwrap_or_default()
        };
        if pending.is_empty() {
            return stashed;
        }
        for child in &pending {
            kernel::cancel_task(sim.rt(), *child, Fault::Closed(TaskClosed));
        }
        for child in pending {
            let Some(done) = done_cond(sim.rt(), child) else {
                continue;
            };
            loop {
                match sim.wait(&done).await {
                    Ok(()) => break,
                    Err(incoming) => stash_worse(&mut stashed, incoming, scope.id),
                }
            }
        }
    }
}

/// Keeps the highest-ranked fault observed while draining. Signals for this
/// scope itself are already being handled and are ignored.
fn stash_worse(stashed: &mut Option<Fault>, incoming: Fault, own: ScopeId) {
    if let Fault::Interrupt(si) = &incoming {
        if si.scope == own {
            return;
        }
    }
    fn rank(fault: &Fault) -> u8 {
        match fault {
            Fault::Exit(_) => 3,
            Fault::Cancelled(_) | Fault::Closed(_) | Fault::VolatileClosed(_) => 2,
            Fault::Interrupt(_) => 1,
            _ => 0,
        }
    }
    match stashed {
        Some(current) if rank(current) >= rank(&incoming) => {}
        _ => *stashed = Some(incoming),
    }
}

fn done_cond(rt: &Handle, task: TaskId) -> Option<Cond> {
    let core = rt.borrow();
    core.tasks.get(task.arena_index()).map(|record| {
        Cond::leaf(DonePred {
            completion: record.completion.clone(),
        })
    })
}

fn mark_ending(rt: &Handle, scope: ScopeId) {
    let mut core = rt.borrow_mut();
    let Some(record) = core.scopes.get_mut(scope.arena_index()) else {
        return;
    };
    if record.ending {
        return;
    }
    record.ending = true;
    let ended = record.ended.clone();
    ended.set_state(crate::types::TaskState::Success);
    ended.notify().clone().awake_all(&mut core);
}

fn take_failures(rt: &Handle, scope: ScopeId) -> Vec<Fault> {
    let mut core = rt.borrow_mut();
    core.scopes
        .get_mut(scope.arena_index())
        .map(|record| core::mem::take(&mut record.failures))
        .unwrap_or_default()
}

fn close_volatiles(rt: &Handle, scope: ScopeId) {
    let volatiles: Vec<TaskId> = {
        let core = rt.borrow();
        core.scopes
            .get(scope.arena_index())
            .map(|record| record.volatiles.clone())
            .unwrap_or_default()
    };
    for task in volatiles {
        kernel::force_close(rt, task, Fault::VolatileClosed(VolatileTaskClosed));
    }
}

/// Releases the scope and its child records. Child tasks are dropped only
/// here, after teardown has fully completed.
fn release_scope(rt: &Handle, scope: ScopeId) {
    let (children, volatiles) = {
        let mut core = rt.borrow_mut();
        match core.scopes.remove(scope.arena_index()) {
            Some(record) => (record.children, record.volatiles),
            None => return,
        }
    };
    let mut stored: Vec<StoredTask> = Vec::new();
    {
        let mut core = rt.borrow_mut();
        for task in children.into_iter().chain(volatiles) {
            if let Some(mut record) = core.tasks.remove(task.arena_index()) {
                if let Some(future) = record.stored.take() {
                    stored.push(future);
                }
            }
        }
    }
    // Futures dropped outside the kernel borrow; guard destructors may need
    // to reach the kernel.
    drop(stored);
}
