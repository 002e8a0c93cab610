//! Virtual timestamps.
//!
//! Simulation time is a totally ordered `f64` with infinite sentinels at both
//! ends. Time has no inherent unit; a simulation should pick one and stay
//! consistent. `SimTime` values are produced by the kernel clock and by
//! adding finite durations to existing timestamps; NaN is rejected at every
//! construction site, which is what makes the total order sound.

use core::fmt;
use std::ops::{Add, Sub};

/// A point in virtual time.
///
/// `SimTime` orders totally (via `f64::total_cmp`) so it can key the kernel's
/// time queue. The negative-infinite and positive-infinite values are the
/// "instant" and "eternity" reaches of the time axis: no scheduled event can
/// ever sort before the former or be reached at the latter.
#[derive(Clone, Copy, PartialEq)]
pub struct SimTime(f64);

impl SimTime {
    /// The conventional start of a simulation.
    pub const ZERO: Self = Self(0.0);

    /// A point infinitely far in the future. Never reached by the clock.
    pub const ETERNITY: Self = Self(f64::INFINITY);

    /// A point before every reachable timestamp.
    pub const INSTANT: Self = Self(f64::NEG_INFINITY);

    /// Creates a timestamp from a raw value.
    ///
    /// # Panics
    ///
    /// Panics if `value` is NaN; NaN has no place in a total order.
    #[must_use]
    pub fn new(value: f64) -> Self {
        assert!(!value.is_nan(), "virtual time cannot be NaN");
        // Collapse -0.0 so equal instants share one time-queue bucket.
        Self(if value == 0.0 { 0.0 } else { value })
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_f64(self) -> f64 {
        self.0
    }

    /// Returns true for a finite, reachable timestamp.
    #[must_use]
    pub fn is_finite(self) -> bool {
        self.0.is_finite()
    }

    /// This timestamp advanced by `delta`.
    #[must_use]
    pub fn advanced_by(self, delta: f64) -> Self {
        Self::new(self.0 + delta)
    }
}

impl Eq for SimTime {}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl From<f64> for SimTime {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl Add<f64> for SimTime {
    type Output = Self;

    fn add(self, rhs: f64) -> Self {
        self.advanced_by(rhs)
    }
}

impl Sub<SimTime> for SimTime {
    type Output = f64;

    fn sub(self, rhs: SimTime) -> f64 {
        self.0 - rhs.0
    }
}

impl fmt::Debug for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SimTime({self})")
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == f64::INFINITY {
            write!(f, "eternity")
        } else if self.0 == f64::NEG_INFINITY {
            write!(f, "instant")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
