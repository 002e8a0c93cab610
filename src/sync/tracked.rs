//! Tracked values and relational conditions over them.
//!
//! A [`Tracked`] wraps a value whose mutations wake the conditions derived
//! from it. Comparisons against constants or other tracked values produce
//! re-evaluating [`Cond`]s; arithmetic helpers mutate the value and notify.

use crate::cx::Sim;
use crate::error::Fault;
use crate::notify::condition::{Cond, Enlisted, Predicate};
use crate::notify::{Notify, Waiter};
use crate::kernel::Handle;
use core::fmt;
use std::cell::RefCell;
use std::ops::{Add, Div, Mul, Sub};
use std::rc::Rc;

#[derive(Debug)]
struct TrackedState<T> {
    value: RefCell<T>,
    listeners: Rc<Notify>,
}

/// A value whose changes are tracked to derive notification points.
///
/// ```ignore
/// let coffee = Tracked::new(1.0_f64);
/// sim.wait(&coffee.lt(0.1)).await?;     // wake when coffee runs low
/// coffee.add(&sim, 0.9).await?;          // refill, waking the watchers
/// ```
pub struct Tracked<T> {
    state: Rc<TrackedState<T>>,
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tracked({:?})", self.state.value.borrow())
    }
}

impl<T: 'static> Tracked<T> {
    /// Creates a tracked value.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            state: Rc::new(TrackedState {
                value: RefCell::new(value),
                listeners: Rc::new(Notify::new()),
            }),
        }
    }

    /// A copy of the current value, without suspending.
    #[must_use]
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.state.value.borrow().clone()
    }

    /// Replaces the value, waking every derived condition's waiters.
    pub async fn set(&self, sim: &Sim, to: T) -> Result<(), Fault> {
        *self.state.value.borrow_mut() = to;
        self.state
            .listeners
            .clone()
            .awake_all(&mut sim.rt().borrow_mut());
        sim.postpone().await
    }

    /// Adds `rhs` to the value and notifies.
    pub async fn add(&self, sim: &Sim, rhs: T) -> Result<(), Fault>
    where
        T: Add<Output = T> + Clone,
    {
        let next = self.get() + rhs;
        self.set(sim, next).await
    }

    /// Subtracts `rhs` from the value and notifies.
    pub async fn sub(&self, sim: &Sim, rhs: T) -> Result<(), Fault>
    where
        T: Sub<Output = T> + Clone,
    {
        let next = self.get() - rhs;
        self.set(sim, next).await
    }

    /// Multiplies the value by `rhs` and notifies.
    pub async fn mul(&self, sim: &Sim, rhs: T) -> Result<(), Fault>
    where
        T: Mul<Output = T> + Clone,
    {
        let next = self.get() * rhs;
        self.set(sim, next).await
    }

    /// Divides the value by `rhs` and notifies.
    pub async fn div(&self, sim: &Sim, rhs: T) -> Result<(), Fault>
    where
        T: Div<Output = T> + Clone,
    {
        let next = self.get() / rhs;
        self.set(sim, next).await
    }
}

impl<T: PartialOrd + 'static> Tracked<T> {
    /// The condition `self == rhs`.
    #[must_use]
    pub fn eq(&self, rhs: impl Into<Operand<T>>) -> Cond {
        self.relation(Rel::Eq, rhs.into())
    }

    /// The condition `self != rhs`.
    #[must_use]
    pub fn ne(&self, rhs: impl Into<Operand<T>>) -> Cond {
        self.relation(Rel::Ne, rhs.into())
    }

    /// The condition `self < rhs`.
    #[must_use]
    pub fn lt(&self, rhs: impl Into<Operand<T>>) -> Cond {
        self.relation(Rel::Lt, rhs.into())
    }

    /// The condition `self <= rhs`.
    #[must_use]
    pub fn le(&self, rhs: impl Into<Operand<T>>) -> Cond {
        self.relation(Rel::Le, rhs.into())
    }

    /// The condition `self > rhs`.
    #[must_use]
    pub fn gt(&self, rhs: impl Into<Operand<T>>) -> Cond {
        self.relation(Rel::Gt, rhs.into())
    }

    /// The condition `self >= rhs`.
    #[must_use]
    pub fn ge(&self, rhs: impl Into<Operand<T>>) -> Cond {
        self.relation(Rel::Ge, rhs.into())
    }

    fn relation(&self, rel: Rel, rhs: Operand<T>) -> Cond {
        Cond::leaf(ExprPred {
            rel,
            left: self.state.clone(),
            right: rhs,
        })
    }
}

/// The right-hand side of a tracked comparison: a constant or another
/// tracked value.
pub enum Operand<T> {
    /// Compare against a fixed value.
    Const(T),
    /// Compare against another tracked value; changes on either side
    /// re-evaluate the condition.
    Tracked(Tracked<T>),
}

impl<T> From<T> for Operand<T> {
    fn from(value: T) -> Self {
        Self::Const(value)
    }
}

impl<T> From<&Tracked<T>> for Operand<T> {
    fn from(tracked: &Tracked<T>) -> Self {
        Self::Tracked(tracked.clone())
    }
}

#[derive(Debug, Clone, Copy)]
enum Rel {
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
}

impl Rel {
    fn test<T: PartialOrd>(self, left: &T, right: &T) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Eq => left == right,
            Self::Ne => left != right,
            Self::Ge => left >= right,
            Self::Gt => left > right,
        }
    }

    const fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Ge => ">=",
            Self::Gt => ">",
        }
    }
}

struct ExprPred<T> {
    rel: Rel,
    left: Rc<TrackedState<T>>,
    right: Operand<T>,
}

impl<T: PartialOrd + 'static> Predicate for ExprPred<T> {
    fn holds(&self, _rt: &Handle) -> bool {
        let left = self.left.value.borrow();
        match &self.right {
            Operand::Const(c) => self.rel.test(&*left, c),
            Operand::Tracked(t) if Rc::ptr_eq(&t.state, &self.left) => {
                self.rel.test(&*left, &*left)
            }
            Operand::Tracked(t) => {
                let right = t.state.value.borrow();
                self.rel.test(&*left, &*right)
            }
        }
    }

    fn enlist(&self, _rt: &Handle, waiter: &Waiter, _polarity: bool, enlisted: &mut Enlisted) {
        // A relational condition re-evaluates on any change of its sources,
        // whichever polarity is awaited.
        enlisted.subscribe(&self.left.listeners, waiter);
        if let Operand::Tracked(t) = &self.right {
            if !Rc::ptr_eq(&t.state, &self.left) {
                enlisted.subscribe(&t.state.listeners, waiter);
            }
        }
    }

    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tracked {} _", self.rel.symbol())
    }
}
