//! The `Sim` capability handle.
//!
//! Every activity receives its own `Sim`, bound to the task it runs in. All
//! effectful operations flow through it: reading the clock, suspending on
//! conditions, structuring concurrency. There is no ambient "current
//! simulation"; the handle is the capability.

mod scope;
mod task;

pub use scope::Scope;
pub use task::Task;

pub(crate) use scope::run_scope;
pub(crate) use task::spawn_task;

use crate::error::Fault;
use crate::kernel::wake::WakeToken;
use crate::kernel::Handle;
use crate::notify::condition::{Cond, Enlisted};
use crate::notify::{Hibernate, Waiter};
use crate::time::{After, Delay, Every, Moment};
use crate::types::{SimTime, TaskId};
use std::future::Future;

/// The capability handle of a running activity.
///
/// A `Sim` is handed to each activity by the kernel and is bound to that
/// activity's task. It grants access to:
///
/// - the virtual clock ([`now`](Self::now)) and time-derived conditions;
/// - suspension ([`wait`](Self::wait), [`sleep`](Self::sleep),
///   [`postpone`](Self::postpone), [`instant`](Self::instant),
///   [`eternity`](Self::eternity));
/// - structured concurrency ([`scope`](Self::scope), [`until`](Self::until)).
///
/// Suspension points return `Err` when the task is being torn down; the
/// error is propagated with `?` so drop guards release everything held.
#[derive(Debug, Clone)]
pub struct Sim {
    rt: Handle,
    task: TaskId,
}

impl Sim {
    pub(crate) fn new(rt: Handle, task: TaskId) -> Self {
        Self { rt, task }
    }

    pub(crate) fn rt(&self) -> &Handle {
        &self.rt
    }

    pub(crate) fn task(&self) -> TaskId {
        self.task
    }

    /// The current virtual time.
    #[must_use]
    pub fn now(&self) -> SimTime {
        self.rt.borrow().now
    }

    /// Yields one turn: the task re-enters the turn queue tail and resumes
    /// within the same instant.
    pub async fn postpone(&self) -> Result<(), Fault> {
        let token = WakeToken::new();
        self.rt.borrow_mut().schedule_task(self.task, &token);
        Hibernate::new(self.rt.clone(), self.task, token).await
    }

    /// A future point in time indistinguishable from the present; awaiting
    /// it merely postpones.
    pub async fn instant(&self) -> Result<(), Fault> {
        self.postpone().await
    }

    /// Suspends forever. Only teardown resumes the task.
    pub async fn eternity(&self) -> Result<(), Fault> {
        Hibernate::new(self.rt.clone(), self.task, WakeToken::new()).await
    }

    /// Suspends for `duration` units of virtual time.
    pub async fn sleep(&self, duration: f64) -> Result<(), Fault> {
        self.wait(&self.delay(duration)).await
    }

    /// A one-shot condition firing `duration` after the moment it is
    /// awaited. Each wait measures the delay anew.
    #[must_use]
    pub fn delay(&self, duration: f64) -> Cond {
        Cond::leaf(Delay::new(duration))
    }

    /// The condition `time == at`: true during that instant only.
    ///
    /// Awaited after `at` has passed, it suspends forever.
    #[must_use]
    pub fn at(&self, at: impl Into<SimTime>) -> Cond {
        Cond::leaf(Moment::new(at.into()))
    }

    /// The condition `time >= at`, inclusive of the instant itself.
    #[must_use]
    pub fn reached(&self, at: impl Into<SimTime>) -> Cond {
        Cond::leaf(After::new(at.into()))
    }

    /// The condition `time < at`: fires immediately while still before
    /// `at`, never afterwards.
    #[must_use]
    pub fn before(&self, at: impl Into<SimTime>) -> Cond {
        !self.reached(at)
    }

    /// Suspends until `cond` is true.
    ///
    /// A condition that is already true still costs one turn (awaiting is
    /// always an interruption), and is re-checked after it: the wait
    /// completes only while the condition actually holds.
    pub async fn wait(&self, cond: &Cond) -> Result<(), Fault> {
        if cond.holds(&self.rt) {
            self.postpone().await?;
        }
        while !cond.holds(&self.rt) {
            let token = WakeToken::new();
            let waiter = Waiter {
                task: self.task,
                token: token.clone(),
            };
            let mut enlisted = Enlisted::new();
            cond.enlist(&self.rt, &waiter, true, &mut enlisted);
            let woken = Hibernate::new(self.rt.clone(), self.task, token).await;
            drop(enlisted);
            woken?;
            if cond.one_shot() {
                break;
            }
        }
        Ok(())
    }

    /// Paces iteration by a fixed pause: each step fires `period` after the
    /// previous resumption.
    #[must_use]
    pub fn every_delay(&self, period: f64) -> Every {
        Every::delay(period)
    }

    /// Paces iteration on a fixed grid anchored now: steps fire at
    /// `t0 + period`, `t0 + 2 * period`, independent of in-step work.
    #[must_use]
    pub fn every_interval(&self, period: f64) -> Every {
        Every::interval(period, self.now())
    }

    /// Runs `body` in a new scope owning its child tasks.
    ///
    /// The scope exits only once every non-volatile child is terminal.
    /// Child failures aggregate into one [`Concurrent`](crate::Concurrent);
    /// a failure of the body itself propagates unwrapped, taking precedence
    /// over child failures.
    pub async fn scope<T, F, Fut>(&self, body: F) -> Result<T, Fault>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<T, Fault>>,
    {
        run_scope(self, None, body)
            .await
            .map(|v| v.expect("unguarded scope always completes its body"))
    }

    /// Runs `body` in a scope that is gracefully closed when `guard` fires.
    ///
    /// Returns `Ok(None)` when the guard interrupted the body, `Ok(Some(_))`
    /// when the body finished first. Children are cancelled with
    /// [`TaskClosed`](crate::TaskClosed) on guard fire; independent child
    /// failures still surface as [`Concurrent`](crate::Concurrent).
    pub async fn until<T, F, Fut>(&self, guard: Cond, body: F) -> Result<Option<T>, Fault>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<T, Fault>>,
    {
        run_scope(self, Some(guard), body).await
    }
}
