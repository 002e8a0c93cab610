//! Explicitly settable Boolean condition.

use crate::cx::Sim;
use crate::error::Fault;
use crate::notify::condition::{Cond, Enlisted, Predicate};
use crate::notify::{Notify, Waiter};
use crate::kernel::Handle;
use core::fmt;
use std::cell::Cell;
use std::rc::Rc;

#[derive(Debug)]
struct FlagState {
    value: Cell<bool>,
    on_true: Rc<Notify>,
    on_false: Rc<Notify>,
}

/// An explicitly settable condition.
///
/// Both polarities are awaitable: `flag.cond()` fires on the transition to
/// true, `!flag.cond()` on the transition to false. Setting the current
/// value again wakes nobody.
///
/// ```ignore
/// let flag = Flag::new();
/// sim.wait(&flag.cond()).await?;   // elsewhere: flag.set(&sim).await?
/// ```
#[derive(Debug, Clone, Default)]
pub struct Flag {
    state: Rc<FlagState>,
}

impl Default for FlagState {
    fn default() -> Self {
        Self {
            value: Cell::new(false),
            on_true: Rc::new(Notify::new()),
            on_false: Rc::new(Notify::new()),
        }
    }
}

impl Flag {
    /// Creates a flag that starts false.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current value, without suspending.
    #[must_use]
    pub fn get(&self) -> bool {
        self.state.value.get()
    }

    /// Sets the flag to true.
    pub async fn set(&self, sim: &Sim) -> Result<(), Fault> {
        self.set_to(sim, true).await
    }

    /// Sets the flag to false.
    pub async fn clear(&self, sim: &Sim) -> Result<(), Fault> {
        self.set_to(sim, false).await
    }

    /// Sets the flag. Re-setting the current value is a no-op; otherwise
    /// every task waiting on the reached polarity is woken.
    pub async fn set_to(&self, sim: &Sim, to: bool) -> Result<(), Fault> {
        if self.state.value.get() != to {
            self.state.value.set(to);
            let notify = if to {
                self.state.on_true.clone()
            } else {
                self.state.on_false.clone()
            };
            notify.awake_all(&mut sim.rt().borrow_mut());
        }
        sim.postpone().await
    }

    /// The condition that this flag is true.
    #[must_use]
    pub fn cond(&self) -> Cond {
        Cond::leaf(FlagPred {
            state: self.state.clone(),
        })
    }
}

struct FlagPred {
    state: Rc<FlagState>,
}

impl Predicate for FlagPred {
    fn holds(&self, _rt: &Handle) -> bool {
        self.state.value.get()
    }

    fn enlist(&self, _rt: &Handle, waiter: &Waiter, polarity: bool, enlisted: &mut Enlisted) {
        let notify = if polarity {
            &self.state.on_true
        } else {
            &self.state.on_false
        };
        enlisted.subscribe(notify, waiter);
    }

    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flag[{}]", self.state.value.get())
    }
}
