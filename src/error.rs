//! Error types and the failure taxonomy.
//!
//! Failures in the simulation are exception-shaped: an activity returns
//! `Err(Fault)` and the error unwinds through `?`, running drop guards on the
//! way out. The taxonomy mirrors how a fault is treated at scope close:
//!
//! - Teardown sentinels ([`TaskCancelled`], [`TaskClosed`],
//!   [`VolatileTaskClosed`], scope interrupts) terminate exactly one task and
//!   are never aggregated.
//! - Real failures (anything else) are captured in the task payload and
//!   aggregated by the owning scope into one [`Concurrent`].
//! - [`ExitSimulation`] is global-fatal: it stops the kernel and supersedes
//!   aggregation.

use crate::types::ScopeId;
use core::fmt;
use std::any::TypeId;
use std::rc::Rc;
use thiserror::Error;

/// A task was cancelled by an explicit [`cancel`](crate::Task::cancel) call.
#[derive(Debug, Clone, Error)]
#[error("task cancelled: {reason}")]
pub struct TaskCancelled {
    /// Why the task was cancelled. Static for determinism.
    pub reason: &'static str,
}

/// A task was wound down gracefully because its scope is closing.
#[derive(Debug, Clone, Copy, Error)]
#[error("task closed with its scope")]
pub struct TaskClosed;

/// A volatile task was force-terminated at scope teardown.
#[derive(Debug, Clone, Copy, Error)]
#[error("volatile task closed with its scope")]
pub struct VolatileTaskClosed;

/// An operation was attempted on a closed channel or queue.
#[derive(Debug, Clone, Copy, Error)]
#[error("stream is closed")]
pub struct StreamClosed;

/// A resource claim can never be satisfied.
#[derive(Debug, Clone, Error)]
#[error("resource claim cannot be satisfied: {reason}")]
pub struct ResourcesUnavailable {
    /// What makes the claim infeasible.
    pub reason: &'static str,
}

/// Explicit global-fatal stop signal.
///
/// Ends the whole simulation; never aggregated into [`Concurrent`].
#[derive(Debug, Clone, Error)]
#[error("simulation exit: {reason}")]
pub struct ExitSimulation {
    /// Why the simulation was stopped.
    pub reason: &'static str,
}

/// Synchronous misuse of the API, reported at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UsageError {
    /// `run` was called while the kernel is already running.
    #[error("kernel is already running")]
    ReenterKernel,
    /// A task tried to acquire a lock it already holds.
    #[error("lock is already held by this task")]
    RecursiveLock,
    /// A resource operation named a commodity the bundle does not carry.
    #[error("unknown commodity name")]
    UnknownCommodity,
    /// A resource operation passed a negative amount.
    #[error("amounts must be non-negative")]
    NegativeAmount,
    /// `produce` would push a bounded commodity above its capacity.
    #[error("produce would exceed capacity")]
    CapacityExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InterruptKind {
    /// The scope's guard notification fired (an `until` scope is closing).
    Guard,
    /// A child of the scope failed while the body was still running.
    ChildFailed,
}

/// Kernel-internal control signal targeting a scope.
///
/// User code should propagate this with `?` and never catch it; the owning
/// scope consumes it on exit.
#[derive(Debug, Clone, Error)]
#[error("scope control interrupt")]
pub struct ScopeInterrupt {
    pub(crate) scope: ScopeId,
    pub(crate) kind: InterruptKind,
}

/// An application-defined failure, type-erased for transport.
///
/// Created with [`Fault::app`]; the original error type is recoverable via
/// [`AppFault::is`] and [`AppFault::downcast_ref`], and drives the typed
/// matching of [`Concurrent`].
#[derive(Clone)]
pub struct AppFault {
    type_id: TypeId,
    inner: Rc<dyn std::error::Error + 'static>,
}

impl AppFault {
    /// Returns true if the wrapped error is of type `E`.
    #[must_use]
    pub fn is<E: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<E>()
    }

    /// Returns the wrapped error if it is of type `E`.
    #[must_use]
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }
}

impl fmt::Debug for AppFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AppFault({:?})", self.inner)
    }
}

impl fmt::Display for AppFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

/// Any failure an activity can produce or observe.
#[derive(Debug, Clone, Error)]
pub enum Fault {
    /// Explicit task cancellation. Task-local; never aggregated.
    #[error(transparent)]
    Cancelled(#[from] TaskCancelled),
    /// Graceful scope teardown. Task-local; never aggregated.
    #[error(transparent)]
    Closed(#[from] TaskClosed),
    /// Forced teardown of a volatile task. Task-local; never aggregated.
    #[error(transparent)]
    VolatileClosed(#[from] VolatileTaskClosed),
    /// Operation on a closed channel or queue.
    #[error(transparent)]
    Stream(#[from] StreamClosed),
    /// Infeasible resource claim.
    #[error(transparent)]
    Unavailable(#[from] ResourcesUnavailable),
    /// Synchronous API misuse.
    #[error(transparent)]
    Usage(#[from] UsageError),
    /// One or more concurrent child failures.
    #[error(transparent)]
    Concurrent(#[from] Concurrent),
    /// Kernel-internal scope control signal; propagate, never catch.
    #[error(transparent)]
    Interrupt(#[from] ScopeInterrupt),
    /// Global-fatal stop; supersedes aggregation.
    #[error(transparent)]
    Exit(#[from] ExitSimulation),
    /// Application-defined failure.
    #[error("{0}")]
    App(AppFault),
}

impl Fault {
    /// Wraps an application error.
    pub fn app<E: std::error::Error + 'static>(err: E) -> Self {
        Self::App(AppFault {
            type_id: TypeId::of::<E>(),
            inner: Rc::new(err),
        })
    }

    /// Creates the global-fatal exit signal.
    #[must_use]
    pub const fn exit(reason: &'static str) -> Self {
        Self::Exit(ExitSimulation { reason })
    }

    /// Returns true for task-local teardown faults.
    ///
    /// These terminate exactly the task they are delivered to and are never
    /// collected into a [`Concurrent`].
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::Cancelled(_) | Self::Closed(_) | Self::VolatileClosed(_) | Self::Interrupt(_)
        )
    }

    /// Returns true for the global-fatal exit signal.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Exit(_))
    }

    /// Returns the aggregate if this fault is a [`Concurrent`].
    #[must_use]
    pub fn concurrent(&self) -> Option<&Concurrent> {
        match self {
            Self::Concurrent(c) => Some(c),
            _ => None,
        }
    }

    /// Returns the application error of type `E`, if that is what this is.
    #[must_use]
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::App(app) => app.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// The type identity used by [`Concurrent`] matching.
    pub(crate) fn match_type_id(&self) -> TypeId {
        match self {
            Self::Cancelled(_) => TypeId::of::<TaskCancelled>(),
            Self::Closed(_) => TypeId::of::<TaskClosed>(),
            Self::VolatileClosed(_) => TypeId::of::<VolatileTaskClosed>(),
            Self::Stream(_) => TypeId::of::<StreamClosed>(),
            Self::Unavailable(_) => TypeId::of::<ResourcesUnavailable>(),
            Self::Usage(_) => TypeId::of::<UsageError>(),
            Self::Concurrent(_) => TypeId::of::<Concurrent>(),
            Self::Interrupt(_) => TypeId::of::<ScopeInterrupt>(),
            Self::Exit(_) => TypeId::of::<ExitSimulation>(),
            Self::App(app) => app.type_id,
        }
    }

    /// Identity used to de-duplicate aggregate members: application faults
    /// share identity only when they wrap the same error instance.
    fn same_instance(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::App(a), Self::App(b)) => Rc::ptr_eq(&a.inner, &b.inner),
            _ => false,
        }
    }
}

/// Aggregate of one or more concurrent child failures.
///
/// Raised by a scope whose children failed while the body itself completed
/// (or was still running). Nested aggregates are kept nested; call
/// [`flattened`](Self::flattened) to collapse them on demand.
#[derive(Debug, Clone)]
pub struct Concurrent {
    children: Vec<Fault>,
}

impl Concurrent {
    pub(crate) fn new(children: Vec<Fault>) -> Self {
        let mut unique: Vec<Fault> = Vec::with_capacity(children.len());
        for child in children {
            if !unique.iter().any(|seen| seen.same_instance(&child)) {
                unique.push(child);
            }
        }
        Self { children: unique }
    }

    /// The inner failures, in the order they were observed.
    #[must_use]
    pub fn children(&self) -> &[Fault] {
        &self.children
    }

    /// Returns a copy with nested `Concurrent` layers removed.
    #[must_use]
    pub fn flattened(&self) -> Self {
        fn collect(c: &Concurrent, out: &mut Vec<Fault>) {
            for child in &c.children {
                match child {
                    Fault::Concurrent(nested) => collect(nested, out),
                    other => out.push(other.clone()),
                }
            }
        }
        let mut out = Vec::new();
        collect(self, &mut out);
        Self::new(out)
    }

    /// Returns true if any inner failure has type `E`.
    #[must_use]
    pub fn contains<E: 'static>(&self) -> bool {
        let wanted = TypeId::of::<E>();
        self.children
            .iter()
            .any(|child| child.match_type_id() == wanted)
    }

    /// Tests this aggregate against a [`TypeSet`].
    #[must_use]
    pub fn matches(&self, set: &TypeSet) -> bool {
        set.matches(self)
    }

    /// Returns the index of the first matching set, if any.
    ///
    /// Dispatch helper for handler tables keyed by required type sets.
    #[must_use]
    pub fn first_match(&self, sets: &[TypeSet]) -> Option<usize> {
        sets.iter().position(|set| self.matches(set))
    }
}

impl fmt::Display for Concurrent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} concurrent failure(s): ", self.children.len())?;
        for (i, child) in self.children.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{child}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Concurrent {}

/// A set of failure types used to match a [`Concurrent`] aggregate.
///
/// An *exact* set matches when every required type is present among the
/// inner failures and every inner failure is one of the required types. An
/// *open* set only demands presence and tolerates extra failure types.
///
/// ```
/// use musim::{test_support::concurrent, Fault, TypeSet};
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("index")]
/// struct IndexError;
/// #[derive(Debug, thiserror::Error)]
/// #[error("key")]
/// struct KeyError;
///
/// let c = concurrent(vec![Fault::app(IndexError), Fault::app(KeyError)]);
/// assert!(c.matches(&TypeSet::exact().require::<IndexError>().require::<KeyError>()));
/// assert!(!c.matches(&TypeSet::exact().require::<IndexError>()));
/// assert!(c.matches(&TypeSet::open().require::<IndexError>()));
/// ```
#[derive(Debug, Clone)]
pub struct TypeSet {
    required: Vec<TypeId>,
    open: bool,
}

impl TypeSet {
    /// A set that matches only when the inner types are exactly the required
    /// ones.
    #[must_use]
    pub const fn exact() -> Self {
        Self {
            required: Vec::new(),
            open: false,
        }
    }

    /// A set that matches supersets of the required types.
    #[must_use]
    pub const fn open() -> Self {
        Self {
            required: Vec::new(),
            open: true,
        }
    }

    /// Adds a required failure type.
    #[must_use]
    pub fn require<E: 'static>(mut self) -> Self {
        let id = TypeId::of::<E>();
        if !self.required.contains(&id) {
            self.required.push(id);
        }
        self
    }

    fn matches(&self, aggregate: &Concurrent) -> bool {
        let present: Vec<TypeId> = aggregate
            .children
            .iter()
            .map(Fault::match_type_id)
            .collect();
        let all_required_present = self.required.iter().all(|id| present.contains(id));
        if !all_required_present {
            return false;
        }
        self.open || present.iter().all(|id| self.required.contains(id))
    }
}

/// Helpers for doctests and external test suites.
#[doc(hidden)]
pub mod test_support {
    use super::{Concurrent, Fault};

    /// Builds an aggregate from raw faults.
    #[must_use]
    pub fn concurrent(children: Vec<Fault>) -> Concurrent {
        Concurrent::new(children)
    }
}
