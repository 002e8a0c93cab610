//! The simulation kernel: clock, queues, task and scope tables, run loop.
//!
//! The kernel drives a two-level dispatch: a FIFO turn queue of resumptions
//! at the current instant, and a time queue of wake records bucketed per
//! timestamp. Time advances only when the turn queue is empty; records tied
//! to the next timestamp move into the turn queue in insertion order. That
//! is the entire source of determinism: same roots, same `till`, same
//! observable sequence.

pub(crate) mod record;
pub(crate) mod signal;
pub(crate) mod wake;

use crate::cx::{spawn_task, Sim, Task};
use crate::error::{Concurrent, Fault, UsageError};
use crate::notify::Notify;
use crate::tracing_compat::trace;
use crate::types::{ScopeId, SimTime, TaskId, TaskState};
use crate::util::{Arena, TimeQueue};
use record::{ScopeRecord, StoredTask, TaskRecord};
use signal::Signal;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::rc::Rc;
use std::task::{Context, Poll};
use wake::{noop_waker, WakeRecord, WakeToken};

/// Shared handle to the kernel state.
pub(crate) type Handle = Rc<RefCell<Core>>;

/// The kernel state proper. Single-threaded; shared via `Rc<RefCell<_>>`
/// and never borrowed across a task poll.
#[derive(Debug)]
pub(crate) struct Core {
    pub now: SimTime,
    pub turn: VecDeque<(TaskId, WakeToken)>,
    pub timeq: TimeQueue<WakeRecord>,
    pub tasks: Arena<TaskRecord>,
    pub scopes: Arena<ScopeRecord>,
    /// Fires on every clock advance.
    pub advance: Rc<Notify>,
    /// A global-fatal fault stops the loop and supersedes aggregation.
    pub fatal: Option<Fault>,
    pub running: bool,
}

impl Core {
    fn new(start: SimTime) -> Self {
        Self {
            now: start,
            turn: VecDeque::new(),
            timeq: TimeQueue::new(),
            tasks: Arena::new(),
            scopes: Arena::new(),
            advance: Rc::new(Notify::new()),
            fatal: None,
            running: false,
        }
    }

    /// Queues a resumption for the current instant. Returns false if the
    /// token was stale or already queued.
    pub(crate) fn schedule_task(&mut self, task: TaskId, token: &WakeToken) -> bool {
        if token.mark_scheduled() {
            self.turn.push_back((task, token.clone()));
            true
        } else {
            false
        }
    }

    /// Queues a resumption at a future instant.
    pub(crate) fn schedule_task_at(&mut self, at: SimTime, task: TaskId, token: WakeToken) {
        if token.mark_scheduled() {
            self.timeq.push(at, WakeRecord::Task { task, token });
        }
    }

    /// Queues a notification to fire at a future instant. Returns the
    /// record's token so the trigger can be revoked.
    pub(crate) fn schedule_fire_at(&mut self, at: SimTime, notify: Rc<Notify>) -> WakeToken {
        let token = WakeToken::new();
        let queued = token.mark_scheduled();
        debug_assert!(queued);
        self.timeq.push(
            at,
            WakeRecord::Fire {
                notify,
                token: token.clone(),
            },
        );
        token
    }

    /// Queues a signal on a task and schedules it for the current instant.
    /// Delivery to a terminal task is a no-op.
    pub(crate) fn deliver(&mut self, task: TaskId, signal: Signal) {
        let Some(rec) = self.tasks.get_mut(task.arena_index()) else {
            return;
        };
        if rec.completion.state().is_terminal() {
            return;
        }
        rec.pending.push(signal);
        let token = WakeToken::new();
        let queued = token.mark_scheduled();
        debug_assert!(queued);
        self.turn.push_back((task, token));
    }

    /// Removes and returns the highest-priority pending signal, if any.
    /// Among equal priorities the oldest wins.
    pub(crate) fn take_signal(&mut self, task: TaskId) -> Option<Signal> {
        let rec = self.tasks.get_mut(task.arena_index())?;
        if rec.pending.is_empty() {
            return None;
        }
        let mut best = 0;
        for (i, signal) in rec.pending.iter().enumerate() {
            if signal.priority() > rec.pending[best].priority() {
                best = i;
            }
        }
        Some(rec.pending.remove(best))
    }

    pub(crate) fn has_pending_cancel(&self, task: TaskId) -> bool {
        self.tasks
            .get(task.arena_index())
            .is_some_and(|rec| rec.pending.iter().any(|s| matches!(s, Signal::Cancel(_))))
    }
}

/// Captures a task's unhandled outcome and informs its scope.
///
/// Called by the wrapped task future when the body returns, and by the
/// teardown paths below. Terminal states are sticky.
pub(crate) fn finish_task(rt: &Handle, id: TaskId, fault: Option<Fault>) {
    let mut core = rt.borrow_mut();
    let Some(rec) = core.tasks.get_mut(id.arena_index()) else {
        return;
    };
    if rec.completion.state().is_terminal() {
        return;
    }
    let state = match &fault {
        None => TaskState::Success,
        Some(f) if f.is_cancellation() => TaskState::Cancelled,
        Some(_) => TaskState::Failed,
    };
    let completion = rec.completion.clone();
    let scope_id = rec.scope;
    rec.pending.clear();

    completion.set_state(state);
    if let Some(f) = &fault {
        completion.set_fault(f.clone());
    }
    completion.notify().clone().awake_all(&mut core);
    trace!(task = %id, state = %state, "task finished");

    if state != TaskState::Failed {
        return;
    }
    let fault = fault.unwrap_or_else(|| unreachable!("failed task carries a fault"));
    if fault.is_fatal() {
        core.fatal = Some(fault);
        return;
    }
    // Scope hook: record the failure, and interrupt the owner once unless
    // the scope is already closing or in its exit phase.
    let Some(sid) = scope_id else { return };
    let mut signal_owner = None;
    if let Some(scope) = core.scopes.get_mut(sid.arena_index()) {
        scope.failures.push(fault);
        if !scope.closing && !scope.ending && !scope.failing {
            scope.failing = true;
            signal_owner = scope.owner;
        }
    }
    if let Some(owner) = signal_owner {
        core.deliver(owner, Signal::ChildFailed(sid));
    }
}

/// Requests teardown of a task with the given fault.
///
/// A task that has not started is terminated immediately without ever
/// running. Otherwise the fault is delivered at the next suspension point.
/// Cancelling a terminal task, or one with a teardown already pending, is a
/// no-op.
pub(crate) fn cancel_task(rt: &Handle, id: TaskId, fault: Fault) {
    let mut dropped = None;
    {
        let mut core = rt.borrow_mut();
        let Some(rec) = core.tasks.get_mut(id.arena_index()) else {
            return;
        };
        match rec.completion.state() {
            state if state.is_terminal() => return,
            TaskState::Created => {
                rec.spawn_token.revoke();
                dropped = rec.stored.take();
                let completion = rec.completion.clone();
                completion.set_state(TaskState::Cancelled);
                completion.set_fault(fault);
                completion.notify().clone().awake_all(&mut core);
                trace!(task = %id, "task cancelled before start");
            }
            _ => {
                if core.has_pending_cancel(id) {
                    return;
                }
                core.deliver(id, Signal::Cancel(fault));
            }
        }
    }
    drop(dropped);
}

/// Force-terminates a task right now, dropping its future.
///
/// Used for volatile children at scope teardown; drop guards inside the
/// future still run, so held locks and resources are released.
pub(crate) fn force_close(rt: &Handle, id: TaskId, fault: Fault) {
    let mut dropped = None;
    {
        let mut core = rt.borrow_mut();
        let Some(rec) = core.tasks.get_mut(id.arena_index()) else {
            return;
        };
        if rec.completion.state().is_terminal() {
            return;
        }
        rec.spawn_token.revoke();
        dropped = rec.stored.take();
        rec.pending.clear();
        let completion = rec.completion.clone();
        completion.set_state(TaskState::Cancelled);
        completion.set_fault(fault);
        completion.notify().clone().awake_all(&mut core);
        trace!(task = %id, "task force closed");
    }
    drop(dropped);
}

/// Marks an `until` scope as closing and interrupts its owner.
pub(crate) fn fire_scope_guard(rt: &Handle, scope: ScopeId) {
    let mut core = rt.borrow_mut();
    let Some(rec) = core.scopes.get_mut(scope.arena_index()) else {
        return;
    };
    if rec.closing {
        return;
    }
    rec.closing = true;
    let owner = rec.owner;
    if let Some(owner) = owner {
        core.deliver(owner, Signal::Guard(scope));
    }
}

/// Polls one task outside any kernel borrow.
pub(crate) fn poll_task(rt: &Handle, id: TaskId) {
    let mut stored = {
        let mut core = rt.borrow_mut();
        let Some(rec) = core.tasks.get_mut(id.arena_index()) else {
            return;
        };
        if rec.completion.state().is_terminal() {
            return;
        }
        rec.completion.set_state(TaskState::Running);
        match rec.stored.take() {
            Some(stored) => stored,
            None => return,
        }
    };
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    let poll = stored.poll(&mut cx);
    {
        let mut core = rt.borrow_mut();
        if poll == Poll::Pending {
            if let Some(rec) = core.tasks.get_mut(id.arena_index()) {
                if !rec.completion.state().is_terminal() {
                    rec.completion.set_state(TaskState::Waiting);
                    rec.stored = Some(stored);
                    return;
                }
            }
        }
    }
    // Terminal or finished: drop the future outside the borrow so guard
    // destructors can reach the kernel.
    drop(stored);
}

/// A discrete-event simulation.
///
/// Owns the kernel state and the root scope. Activities are spawned with
/// [`spawn`](Self::spawn) and executed by [`run`](Self::run) or
/// [`run_until`](Self::run_until); both return when the simulation goes
/// quiescent (or the time bound is hit), surfacing root failures as one
/// [`Concurrent`].
///
/// # Example
///
/// ```
/// use musim::Simulation;
///
/// let mut sim = Simulation::new();
/// sim.spawn(|sim| async move {
///     sim.sleep(3.0).await?;
///     assert_eq!(sim.now().as_f64(), 3.0);
///     Ok(())
/// });
/// sim.run().unwrap();
/// ```
#[derive(Debug)]
pub struct Simulation {
    rt: Handle,
    root: ScopeId,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    /// Creates a simulation starting at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(SimTime::ZERO)
    }

    /// Creates a simulation starting at the given time.
    #[must_use]
    pub fn starting_at(start: impl Into<SimTime>) -> Self {
        let mut core = Core::new(start.into());
        let root = ScopeId::from_arena(core.scopes.insert(ScopeRecord::new(None)));
        Self {
            rt: Rc::new(RefCell::new(core)),
            root,
        }
    }

    /// The current virtual time.
    #[must_use]
    pub fn now(&self) -> SimTime {
        self.rt.borrow().now
    }

    /// Returns true when no resumption is queued at any instant.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        let core = self.rt.borrow();
        core.turn.is_empty() && core.timeq.is_empty()
    }

    /// Spawns a root activity, scheduled at the current instant.
    pub fn spawn<T, F, Fut>(&mut self, f: F) -> Task<T>
    where
        F: FnOnce(Sim) -> Fut,
        Fut: Future<Output = Result<T, Fault>> + 'static,
        T: 'static,
    {
        spawn_task(&self.rt, self.root, None, false, f)
    }

    /// Runs until both queues drain or a fatal fault stops the kernel.
    pub fn run(&mut self) -> Result<(), Fault> {
        self.run_until(SimTime::ETERNITY)
    }

    /// Runs with an inclusive upper bound on virtual time.
    ///
    /// The loop stops once the earliest queued instant lies beyond `till`;
    /// tasks still pending at that point are left suspended and dropped
    /// with the simulation. Failures of root activities surface as a single
    /// [`Concurrent`]; a fatal fault supersedes them.
    pub fn run_until(&mut self, till: impl Into<SimTime>) -> Result<(), Fault> {
        let till = till.into();
        {
            let mut core = self.rt.borrow_mut();
            if core.running {
                return Err(UsageError::ReenterKernel.into());
            }
            core.running = true;
        }
        loop {
            // Drain the turn queue.
            loop {
                let next = {
                    let mut core = self.rt.borrow_mut();
                    if core.fatal.is_some() {
                        core.turn.clear();
                        None
                    } else {
                        core.turn.pop_front()
                    }
                };
                let Some((task, token)) = next else { break };
                if token.consume() {
                    poll_task(&self.rt, task);
                }
            }
            // Advance time.
            let advanced = {
                let mut core = self.rt.borrow_mut();
                if core.fatal.is_some() {
                    false
                } else {
                    match core.timeq.pop_first_at_or_before(till) {
                        Some((at, bucket)) => {
                            core.now = at;
                            trace!(now = %at, "time advanced");
                            for record in bucket {
                                match record {
                                    WakeRecord::Task { task, token } => {
                                        core.turn.push_back((task, token));
                                    }
                                    WakeRecord::Fire { notify, token } => {
                                        if token.consume() {
                                            notify.awake_all(&mut core);
                                        }
                                    }
                                }
                            }
                            let advance = core.advance.clone();
                            advance.awake_all(&mut core);
                            true
                        }
                        None => false,
                    }
                }
            };
            if !advanced {
                break;
            }
        }
        let mut core = self.rt.borrow_mut();
        core.running = false;
        trace!(
            now = %core.now,
            tasks = core.tasks.len(),
            pending = core.timeq.len(),
            "run finished"
        );
        if let Some(fault) = core.fatal.take() {
            return Err(fault);
        }
        let root = self.root;
        let failures = core
            .scopes
            .get_mut(root.arena_index())
            .map(|scope| core::mem::take(&mut scope.failures))
            .unwrap_or_default();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Concurrent::new(failures).into())
        }
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        // Take every suspended future out of the arena and drop it outside
        // the kernel borrow. This breaks the Rc cycle between records and
        // the kernel handles captured inside the futures, and lets guard
        // destructors run.
        let stored: Vec<StoredTask> = {
            let mut core = self.rt.borrow_mut();
            core.tasks
                .iter_mut()
                .filter_map(|rec| rec.stored.take())
                .collect()
        };
        drop(stored);
    }
}
