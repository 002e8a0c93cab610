//! Multi-commodity resource bundles.
//!
//! A [`Resources`] holds named non-negative levels. Claims either borrow
//! levels for a scope (returned on guard drop) or transfer them permanently
//! (`produce`/`consume`). Claims that cannot be met queue up and are granted
//! strictly in arrival order on every level increase; the head of the queue
//! is never skipped, so a large claim is not starved by small ones behind
//! it. [`Capacities`] is the bounded variant: levels can never exceed the
//! per-commodity capacity fixed at construction.

use crate::cx::Sim;
use crate::error::{Fault, ResourcesUnavailable, UsageError};
use crate::kernel::wake::WakeToken;
use crate::kernel::{Core, Handle};
use crate::notify::{Hibernate, Waiter};
use crate::tracing_compat::trace;
use core::fmt;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

type Amounts = BTreeMap<String, f64>;

struct PendingClaim {
    amounts: Amounts,
    waiter: Waiter,
    granted: Rc<Cell<bool>>,
}

struct ResState {
    levels: Amounts,
    capacity: Option<Amounts>,
    pending: VecQueue,
}

type VecQueue = std::collections::VecDeque<PendingClaim>;

/// Supply of named resources that can be borrowed or permanently moved.
///
/// ```ignore
/// let pool = Resources::new(&[("cores", 8.0), ("memory", 16_000.0)]);
/// {
///     let _claim = pool.borrow(&sim, &[("cores", 2.0)]).await?;
///     // holds two cores until the guard drops
/// }
/// ```
#[derive(Clone)]
pub struct Resources {
    state: Rc<RefCell<ResState>>,
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Resources")
            .field("levels", &state.levels)
            .field("pending", &state.pending.len())
            .finish()
    }
}

impl Resources {
    /// Creates a bundle with the given initial levels.
    ///
    /// # Panics
    ///
    /// Panics if no commodities are given or any level is negative; a
    /// bundle's shape is fixed at construction.
    #[must_use]
    pub fn new(levels: &[(&str, f64)]) -> Self {
        Self::build(levels, false)
    }

    fn build(levels: &[(&str, f64)], bounded: bool) -> Self {
        assert!(!levels.is_empty(), "a resource bundle needs at least one commodity");
        let mut map = Amounts::new();
        for (name, level) in levels {
            assert!(*level >= 0.0, "initial levels must be non-negative");
            map.insert((*name).to_owned(), *level);
        }
        let capacity = bounded.then(|| map.clone());
        Self {
            state: Rc::new(RefCell::new(ResState {
                levels: map,
                capacity,
                pending: VecQueue::new(),
            })),
        }
    }

    /// The current level of a commodity, or `None` for an unknown name.
    #[must_use]
    pub fn level(&self, name: &str) -> Option<f64> {
        self.state.borrow().levels.get(name).copied()
    }

    /// Borrows levels for a scope; they return when the guard drops.
    ///
    /// Suspends until the claim is satisfiable and at the head of the
    /// queue. An infeasible claim (beyond a bounded bundle's capacity)
    /// fails synchronously with
    /// [`ResourcesUnavailable`](crate::ResourcesUnavailable).
    pub async fn borrow(&self, sim: &Sim, amounts: &[(&str, f64)]) -> Result<Borrowed, Fault> {
        let amounts = self.claimable(amounts)?;
        self.acquire(sim, &amounts).await?;
        Ok(Borrowed {
            resources: self.clone(),
            rt: sim.rt().clone(),
            amounts,
        })
    }

    /// Permanently removes levels, waiting like a borrow if short.
    pub async fn consume(&self, sim: &Sim, amounts: &[(&str, f64)]) -> Result<(), Fault> {
        let amounts = self.claimable(amounts)?;
        self.acquire(sim, &amounts).await
    }

    /// Permanently adds levels, granting queued claims in order.
    ///
    /// On a bounded bundle, producing above capacity is a usage error.
    pub async fn produce(&self, sim: &Sim, amounts: &[(&str, f64)]) -> Result<(), Fault> {
        let amounts = self.validated(amounts)?;
        {
            let mut state = self.state.borrow_mut();
            if let Some(capacity) = &state.capacity {
                for (name, add) in &amounts {
                    let level = state.levels.get(name).copied().unwrap_or(0.0);
                    if level + add > capacity.get(name).copied().unwrap_or(0.0) {
                        return Err(UsageError::CapacityExceeded.into());
                    }
                }
            }
            insert_levels(&mut state.levels, &amounts);
            grant_pending(&mut state, &mut sim.rt().borrow_mut());
        }
        sim.postpone().await
    }

    /// Checks names and signs.
    fn validated(&self, amounts: &[(&str, f64)]) -> Result<Amounts, Fault> {
        let state = self.state.borrow();
        let mut map = Amounts::new();
        for (name, amount) in amounts {
            if !state.levels.contains_key(*name) {
                return Err(UsageError::UnknownCommodity.into());
            }
            if *amount < 0.0 {
                return Err(UsageError::NegativeAmount.into());
            }
            map.insert((*name).to_owned(), *amount);
        }
        Ok(map)
    }

    /// Checks a claim for feasibility as well.
    fn claimable(&self, amounts: &[(&str, f64)]) -> Result<Amounts, Fault> {
        let map = self.validated(amounts)?;
        let state = self.state.borrow();
        if let Some(capacity) = &state.capacity {
            let feasible = map
                .iter()
                .all(|(name, amount)| *amount <= capacity.get(name).copied().unwrap_or(0.0));
            if !feasible {
                return Err(ResourcesUnavailable {
                    reason: "claim exceeds total capacity",
                }
                .into());
            }
        }
        Ok(map)
    }

    /// Deducts `amounts`, queueing behind earlier claims when necessary.
    async fn acquire(&self, sim: &Sim, amounts: &Amounts) -> Result<(), Fault> {
        loop {
            let fast = {
                let state = self.state.borrow();
                state.pending.is_empty() && covers(&state.levels, amounts)
            };
            if fast {
                // Claiming is a suspension point even when satisfied.
                sim.postpone().await?;
                let mut state = self.state.borrow_mut();
                if state.pending.is_empty() && covers(&state.levels, amounts) {
                    deduct_levels(&mut state.levels, amounts);
                    return Ok(());
                }
                // Lost the levels while postponed; try again.
                continue;
            }
            let token = WakeToken::new();
            let granted = Rc::new(Cell::new(false));
            self.state.borrow_mut().pending.push_back(PendingClaim {
                amounts: amounts.clone(),
                waiter: Waiter {
                    task: sim.task(),
                    token: token.clone(),
                },
                granted: granted.clone(),
            });
            let queued = ClaimGuard {
                resources: self.clone(),
                rt: sim.rt().clone(),
                token: token.clone(),
                granted: granted.clone(),
                amounts: amounts.clone(),
                armed: true,
            };
            Hibernate::new(sim.rt().clone(), sim.task(), token).await?;
            let mut queued = queued;
            queued.armed = false;
            debug_assert!(granted.get(), "claim woken without being granted");
            return Ok(());
        }
    }

    fn release(&self, rt: &Handle, amounts: &Amounts) {
        let mut state = self.state.borrow_mut();
        insert_levels(&mut state.levels, amounts);
        grant_pending(&mut state, &mut rt.borrow_mut());
    }
}

fn covers(levels: &Amounts, amounts: &Amounts) -> bool {
    amounts
        .iter()
        .all(|(name, amount)| levels.get(name).copied().unwrap_or(0.0) >= *amount)
}

fn insert_levels(levels: &mut Amounts, amounts: &Amounts) {
    for (name, amount) in amounts {
        if let Some(level) = levels.get_mut(name) {
            *level += amount;
        }
    }
}

fn deduct_levels(levels: &mut Amounts, amounts: &Amounts) {
    for (name, amount) in amounts {
        if let Some(level) = levels.get_mut(name) {
            *level -= amount;
            debug_assert!(*level >= -1e-9, "resource level went negative");
        }
    }
}

/// Grants queued claims strictly head-first: deduct, mark granted, wake.
/// Stops at the first claim the levels cannot cover.
fn grant_pending(state: &mut ResState, core: &mut Core) {
    loop {
        let Some(head) = state.pending.front() else { return };
        let stale = head.granted.get();
        if stale {
            state.pending.pop_front();
            continue;
        }
        if !covers(&state.levels, &head.amounts) {
            return;
        }
        let claim = state
            .pending
            .pop_front()
            .unwrap_or_else(|| unreachable!("front was just inspected"));
        if !core.schedule_task(claim.waiter.task, &claim.waiter.token) {
            // Claimant is gone; its guard already removed itself.
            continue;
        }
        deduct_levels(&mut state.levels, &claim.amounts);
        claim.granted.set(true);
        trace!(task = %claim.waiter.task, "resource claim granted");
    }
}

/// Cleans up a cancelled claim. An ungranted claim leaves the queue; a
/// granted one whose owner never resumed rolls its levels back.
struct ClaimGuard {
    resources: Resources,
    rt: Handle,
    token: WakeToken,
    granted: Rc<Cell<bool>>,
    amounts: Amounts,
    armed: bool,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.granted.get() {
            self.resources.release(&self.rt, &self.amounts);
        } else {
            self.resources
                .state
                .borrow_mut()
                .pending
                .retain(|claim| !claim.waiter.token.ptr_eq(&self.token));
        }
    }
}

/// Borrowed levels; returned to the bundle on drop, on every exit path.
pub struct Borrowed {
    resources: Resources,
    rt: Handle,
    amounts: Amounts,
}

impl Drop for Borrowed {
    fn drop(&mut self) {
        self.resources.release(&self.rt, &self.amounts);
    }
}

impl fmt::Debug for Borrowed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Borrowed")
            .field("amounts", &self.amounts)
            .finish()
    }
}

/// Fixed-capacity resources: the bounded variant of [`Resources`].
///
/// Initial levels equal the capacity; [`produce`](Resources::produce) can
/// refill only what was consumed, never exceed the bound, and claims larger
/// than the capacity fail synchronously.
#[derive(Debug, Clone)]
pub struct Capacities {
    inner: Resources,
}

impl Capacities {
    /// Creates a bundle filled to the given capacities.
    ///
    /// # Panics
    ///
    /// Panics if no commodities are given or any capacity is negative.
    #[must_use]
    pub fn new(capacities: &[(&str, f64)]) -> Self {
        Self {
            inner: Resources::build(capacities, true),
        }
    }

    /// The current level of a commodity.
    #[must_use]
    pub fn level(&self, name: &str) -> Option<f64> {
        self.inner.level(name)
    }

    /// See [`Resources::borrow`].
    pub async fn borrow(&self, sim: &Sim, amounts: &[(&str, f64)]) -> Result<Borrowed, Fault> {
        self.inner.borrow(sim, amounts).await
    }

    /// See [`Resources::consume`].
    pub async fn consume(&self, sim: &Sim, amounts: &[(&str, f64)]) -> Result<(), Fault> {
        self.inner.consume(sim, amounts).await
    }

    /// See [`Resources::produce`].
    pub async fn produce(&self, sim: &Sim, amounts: &[(&str, f64)]) -> Result<(), Fault> {
        self.inner.produce(sim, amounts).await
    }
}
