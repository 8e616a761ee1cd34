//! Simulation time and CPU cycle counters.
//!
//! [`SimTime`] is the global simulation clock in whole milliseconds. CPU
//! cycles advance far faster and belong to a single mote, so they get their
//! own type, [`CpuCycles`]. Converting between the two needs an explicit
//! cycles-per-millisecond rate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Simulation time in milliseconds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SimTime(u64);

impl SimTime {
    /// Start of every simulation.
    pub const ZERO: SimTime = SimTime(0);

    /// Largest representable time.
    pub const MAX: SimTime = SimTime(u64::MAX);

    /// Create a time from milliseconds.
    pub const fn from_millis(ms: u64) -> Self {
        SimTime(ms)
    }

    /// Milliseconds since simulation start.
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Seconds since simulation start.
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// The following millisecond.
    pub const fn next_tick(&self) -> SimTime {
        SimTime(self.0.saturating_add(1))
    }

    /// Milliseconds elapsed since `earlier`, zero if `earlier` is later.
    pub const fn saturating_since(&self, earlier: SimTime) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<u64> for SimTime {
    type Output = SimTime;

    fn add(self, ms: u64) -> SimTime {
        SimTime(self.0.saturating_add(ms))
    }
}

impl AddAssign<u64> for SimTime {
    fn add_assign(&mut self, ms: u64) {
        self.0 = self.0.saturating_add(ms);
    }
}

impl Sub for SimTime {
    type Output = u64;

    fn sub(self, rhs: SimTime) -> u64 {
        self.0.saturating_sub(rhs.0)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A mote's CPU cycle counter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CpuCycles(u64);

impl CpuCycles {
    /// No cycles.
    pub const ZERO: CpuCycles = CpuCycles(0);

    /// Create a cycle count.
    pub const fn new(cycles: u64) -> Self {
        CpuCycles(cycles)
    }

    /// Raw cycle count.
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Cycles elapsed since `earlier`, zero if `earlier` is later.
    pub const fn saturating_since(&self, earlier: CpuCycles) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Cycle count reached at the end of `time` for a CPU running at `rate`.
    pub const fn at(time: SimTime, rate: CyclesPerMs) -> Self {
        CpuCycles(time.as_millis().saturating_mul(rate.0))
    }
}

impl Add<u64> for CpuCycles {
    type Output = CpuCycles;

    fn add(self, cycles: u64) -> CpuCycles {
        CpuCycles(self.0.saturating_add(cycles))
    }
}

impl AddAssign<u64> for CpuCycles {
    fn add_assign(&mut self, cycles: u64) {
        self.0 = self.0.saturating_add(cycles);
    }
}

impl fmt::Display for CpuCycles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cycles", self.0)
    }
}

/// Fixed ratio between CPU cycles and simulation milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CyclesPerMs(u64);

impl CyclesPerMs {
    /// MSP430 class CPU clocked at 3.9 MHz.
    pub const MSP430: CyclesPerMs = CyclesPerMs(3_900);

    /// Create a rate. A zero rate is bumped to one cycle per millisecond.
    pub const fn new(cycles: u64) -> Self {
        if cycles == 0 {
            CyclesPerMs(1)
        } else {
            CyclesPerMs(cycles)
        }
    }

    /// Cycles per millisecond.
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Whole milliseconds covered by `cycles`, rounded up.
    pub const fn millis_for(&self, cycles: u64) -> u64 {
        cycles.div_ceil(self.0)
    }
}

impl Default for CyclesPerMs {
    fn default() -> Self {
        CyclesPerMs::MSP430
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_time_arithmetic() {
        let t = SimTime::from_millis(10);
        assert_eq!((t + 5).as_millis(), 15);
        assert_eq!(t.next_tick(), SimTime::from_millis(11));
        assert_eq!(SimTime::from_millis(3) - t, 0);
        assert_eq!(t.saturating_since(SimTime::from_millis(4)), 6);
        assert_eq!(SimTime::MAX.next_tick(), SimTime::MAX);
    }

    #[test]
    fn test_cycles_at_time() {
        let rate = CyclesPerMs::new(1000);
        assert_eq!(CpuCycles::at(SimTime::from_millis(3), rate), CpuCycles::new(3000));
        assert_eq!(rate.millis_for(1200), 2);
        assert_eq!(rate.millis_for(1000), 1);
    }

    #[test]
    fn test_zero_rate_is_clamped() {
        assert_eq!(CyclesPerMs::new(0).get(), 1);
    }
}
