//! Time-derived conditions and paced iteration.
//!
//! Time comparisons are notification leaves scheduled through the kernel's
//! time queue. `time >= T` and `time == T` arm a one-shot trigger at `T` on
//! first subscription; `time + d` measures its delay from the moment it is
//! awaited; `time < T` holds strictly before `T` and can never start
//! holding again.

use crate::cx::Sim;
use crate::error::Fault;
use crate::notify::condition::{Enlisted, Predicate};
use crate::notify::{Notify, Waiter};
use crate::kernel::Handle;
use crate::types::SimTime;
use core::fmt;
use std::cell::Cell;
use std::rc::Rc;

/// The time range at and after a point in time (`time >= at`).
pub(crate) struct After {
    at: SimTime,
    armed: Cell<bool>,
    notify: Rc<Notify>,
}

impl After {
    pub(crate) fn new(at: SimTime) -> Self {
        Self {
            at,
            armed: Cell::new(false),
            notify: Rc::new(Notify::new()),
        }
    }
}

impl Predicate for After {
    fn holds(&self, rt: &Handle) -> bool {
        rt.borrow().now >= self.at
    }

    fn enlist(&self, rt: &Handle, waiter: &Waiter, polarity: bool, enlisted: &mut Enlisted) {
        if !polarity {
            // Waiting for `time < at` once `at` has passed: time never
            // rolls back, so there is nothing to subscribe to.
            return;
        }
        {
            let mut core = rt.borrow_mut();
            if !self.armed.get() {
                self.armed.set(true);
                let _trigger = core.schedule_fire_at(self.at, self.notify.clone());
            }
        }
        enlisted.subscribe(&self.notify, waiter);
    }

    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "time >= {}", self.at)
    }
}

/// A single point in time (`time == at`).
pub(crate) struct Moment {
    at: SimTime,
    armed: Cell<bool>,
    notify: Rc<Notify>,
}

impl Moment {
    pub(crate) fn new(at: SimTime) -> Self {
        Self {
            at,
            armed: Cell::new(false),
            notify: Rc::new(Notify::new()),
        }
    }
}

impl Predicate for Moment {
    fn holds(&self, rt: &Handle) -> bool {
        rt.borrow().now == self.at
    }

    fn enlist(&self, rt: &Handle, waiter: &Waiter, polarity: bool, enlisted: &mut Enlisted) {
        if polarity {
            let now = rt.borrow().now;
            if now < self.at {
                {
                    let mut core = rt.borrow_mut();
                    if !self.armed.get() {
                        self.armed.set(true);
                        let _trigger = core.schedule_fire_at(self.at, self.notify.clone());
                    }
                }
                enlisted.subscribe(&self.notify, waiter);
            }
            // Past the moment: it never comes again.
        } else {
            // `time != at` while sitting exactly at `at`: true on the next
            // clock advance.
            let advance = rt.borrow().advance.clone();
            enlisted.subscribe(&advance, waiter);
        }
    }

    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "time == {}", self.at)
    }
}

/// A relative delay (`time + duration`).
///
/// One-shot: every await arms a fresh trigger measured from the moment of
/// awaiting. Has no truth value of its own, so negating it yields a
/// condition that never fires.
pub(crate) struct Delay {
    duration: f64,
}

impl Delay {
    pub(crate) fn new(duration: f64) -> Self {
        Self { duration }
    }
}

impl Predicate for Delay {
    fn holds(&self, _rt: &Handle) -> bool {
        false
    }

    fn one_shot(&self) -> bool {
        true
    }

    fn enlist(&self, rt: &Handle, waiter: &Waiter, polarity: bool, enlisted: &mut Enlisted) {
        if !polarity {
            return;
        }
        let notify = Rc::new(Notify::new());
        let trigger = {
            let mut core = rt.borrow_mut();
            let at = core.now.advanced_by(self.duration.max(0.0));
            core.schedule_fire_at(at, notify.clone())
        };
        enlisted.timer(trigger);
        enlisted.subscribe(&notify, waiter);
    }

    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "time + {}", self.duration)
    }
}

#[derive(Debug, Clone, Copy)]
enum Pace {
    Delay,
    Interval,
}

/// Paced iteration through time, yielding `now` at each step.
///
/// Created by [`Sim::every_delay`] and [`Sim::every_interval`]. With a
/// delay pace each step fires a fixed pause after the previous resumption;
/// with an interval pace steps fire on a fixed grid anchored at creation
/// time, regardless of how long the loop body took. An overrunning body
/// fires the missed step immediately rather than stalling.
///
/// ```ignore
/// let mut steps = sim.every_delay(10.0);
/// loop {
///     let now = steps.next(&sim).await?;
///     // fires at 10, 20, 30, ...
/// }
/// ```
#[derive(Debug)]
pub struct Every {
    period: f64,
    base: SimTime,
    ticks: u64,
    pace: Pace,
}

impl Every {
    pub(crate) fn delay(period: f64) -> Self {
        Self {
            period,
            base: SimTime::ZERO,
            ticks: 0,
            pace: Pace::Delay,
        }
    }

    pub(crate) fn interval(period: f64, base: SimTime) -> Self {
        Self {
            period,
            base,
            ticks: 0,
            pace: Pace::Interval,
        }
    }

    /// Waits for the next step and returns the time it fired at.
    pub async fn next(&mut self, sim: &Sim) -> Result<SimTime, Fault> {
        match self.pace {
            Pace::Delay => sim.sleep(self.period).await?,
            Pace::Interval => {
                self.ticks += 1;
                let target = self.base.advanced_by(self.period * self.ticks as f64);
                sim.wait(&sim.reached(target)).await?;
            }
        }
        Ok(sim.now())
    }
}
