//! The condition algebra.
//!
//! A [`Cond`] is a Boolean-valued observable: leaves (flags, time
//! comparisons, tracked-value comparisons, task completion) and the
//! combinators `&` (all), `|` (any) and `!` (not). Waiting on a condition
//! subscribes the task to exactly the leaves whose change could make the
//! condition true, hibernates until one fires, and re-evaluates; an
//! unobserved composite costs nothing.
//!
//! Negation is a thin wrapper that flips the polarity of evaluation and
//! enlistment; it is not pushed into leaves. `!(a & b)` and `!a | !b` are
//! distinct objects with equal truth values.

use super::{Notify, Waiter};
use crate::kernel::wake::WakeToken;
use crate::kernel::Handle;
use core::fmt;
use std::rc::Rc;

/// A Boolean-valued observable predicate leaf.
pub(crate) trait Predicate {
    /// Current truth value.
    fn holds(&self, rt: &Handle) -> bool;

    /// Subscribes `waiter` to the transitions that could flip this leaf
    /// towards `polarity`. A leaf that can never make that transition
    /// enlists nothing, leaving the waiter to hibernate indefinitely.
    fn enlist(&self, rt: &Handle, waiter: &Waiter, polarity: bool, enlisted: &mut Enlisted);

    /// One-shot leaves (relative delays) complete a wait on their first
    /// firing instead of being re-evaluated.
    fn one_shot(&self) -> bool {
        false
    }

    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

#[derive(Clone)]
enum CondKind {
    Leaf(Rc<dyn Predicate>),
    All(Rc<[Cond]>),
    Any(Rc<[Cond]>),
    Not(Rc<Cond>),
}

/// A composable, awaitable condition.
///
/// Obtained from the primitives (`Flag::cond`, `Tracked::eq`, `Task::done`,
/// the time builders on [`Sim`](crate::Sim)) and composed with `&`, `|` and
/// `!`. Await with [`Sim::wait`](crate::Sim::wait).
#[derive(Clone)]
pub struct Cond {
    kind: CondKind,
}

impl Cond {
    pub(crate) fn leaf(predicate: impl Predicate + 'static) -> Self {
        Self {
            kind: CondKind::Leaf(Rc::new(predicate)),
        }
    }

    /// Conjunction: true when both sides are true.
    ///
    /// Same-shape operands are merged, so `a & b & c` is one three-way
    /// conjunction rather than a nested pair.
    #[must_use]
    pub fn and(self, other: Cond) -> Cond {
        let mut children = Vec::new();
        for cond in [self, other] {
            match cond.kind {
                CondKind::All(inner) => children.extend(inner.iter().cloned()),
                _ => children.push(cond),
            }
        }
        Cond {
            kind: CondKind::All(children.into()),
        }
    }

    /// Disjunction: true when either side is true.
    #[must_use]
    pub fn or(self, other: Cond) -> Cond {
        let mut children = Vec::new();
        for cond in [self, other] {
            match cond.kind {
                CondKind::Any(inner) => children.extend(inner.iter().cloned()),
                _ => children.push(cond),
            }
        }
        Cond {
            kind: CondKind::Any(children.into()),
        }
    }

    pub(crate) fn holds(&self, rt: &Handle) -> bool {
        match &self.kind {
            CondKind::Leaf(p) => p.holds(rt),
            CondKind::All(children) => children.iter().all(|c| c.holds(rt)),
            CondKind::Any(children) => children.iter().any(|c| c.holds(rt)),
            CondKind::Not(inner) => !inner.holds(rt),
        }
    }

    pub(crate) fn enlist(
        &self,
        rt: &Handle,
        waiter: &Waiter,
        polarity: bool,
        enlisted: &mut Enlisted,
    ) {
        match &self.kind {
            CondKind::Leaf(p) => p.enlist(rt, waiter, polarity, enlisted),
            CondKind::All(children) | CondKind::Any(children) => {
                // Only children whose current value still opposes the wanted
                // polarity can fire a relevant transition.
                for child in children.iter() {
                    if child.holds(rt) != polarity {
                        child.enlist(rt, waiter, polarity, enlisted);
                    }
                }
            }
            CondKind::Not(inner) => inner.enlist(rt, waiter, !polarity, enlisted),
        }
    }

    pub(crate) fn one_shot(&self) -> bool {
        match &self.kind {
            CondKind::Leaf(p) => p.one_shot(),
            _ => false,
        }
    }
}

impl std::ops::BitAnd for Cond {
    type Output = Cond;

    fn bitand(self, rhs: Cond) -> Cond {
        self.and(rhs)
    }
}

impl std::ops::BitOr for Cond {
    type Output = Cond;

    fn bitor(self, rhs: Cond) -> Cond {
        self.or(rhs)
    }
}

impl std::ops::Not for Cond {
    type Output = Cond;

    fn not(self) -> Cond {
        Cond {
            kind: CondKind::Not(Rc::new(self)),
        }
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CondKind::Leaf(p) => p.describe(f),
            CondKind::All(children) => {
                write!(f, "(")?;
                for (i, c) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " & ")?;
                    }
                    write!(f, "{c}")?;
                }
                write!(f, ")")
            }
            CondKind::Any(children) => {
                write!(f, "(")?;
                for (i, c) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{c}")?;
                }
                write!(f, ")")
            }
            CondKind::Not(inner) => write!(f, "~{inner}"),
        }
    }
}

impl fmt::Debug for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cond({self})")
    }
}

/// The subscriptions taken for one wait, released together on drop.
///
/// Dropping unsubscribes every notify entry and revokes every trigger
/// scheduled in the time queue, whether the wait completed, failed or was
/// torn down mid-flight.
#[derive(Default)]
pub(crate) struct Enlisted {
    entries: Vec<(Rc<Notify>, WakeToken)>,
    timers: Vec<WakeToken>,
}

impl Enlisted {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Subscribes the waiter to `notify` and remembers the entry.
    pub(crate) fn subscribe(&mut self, notify: &Rc<Notify>, waiter: &Waiter) {
        notify.subscribe(waiter.clone());
        self.entries.push((notify.clone(), waiter.token.clone()));
    }

    /// Remembers a time-queue trigger to revoke.
    pub(crate) fn timer(&mut self, token: WakeToken) {
        self.timers.push(token);
    }
}

impl Drop for Enlisted {
    fn drop(&mut self) {
        for (notify, token) in &self.entries {
            notify.unsubscribe(token);
        }
        for token in &self.timers {
            token.revoke();
        }
    }
}
