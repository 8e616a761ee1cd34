//! Wall-clock pacing and progress statistics.
//!
//! The throttle action sleeps a fixed delay per simulated millisecond. The
//! sleep parks the scheduler thread so a stop request can cut it short.
//! [`Pacer`] also tracks the ratio of simulated to wall time for periodic
//! progress reports.

use motesim_common::SimTime;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Stop flag shared between the scheduler handle and the running loop.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    stop: Arc<AtomicBool>,
}

impl RunControl {
    /// A control with no stop requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop at its next safe point.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Clear a previous stop request before a restart.
    pub fn reset(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }
}

/// Tracks wall-clock progress of a run.
#[derive(Debug)]
pub struct Pacer {
    start_wall: Instant,
    start_sim: SimTime,
    periodic_interval: Option<Duration>,
    last_periodic_stats: Instant,
    last_periodic_event_count: u64,
    total_sleep: Duration,
    interrupted_sleeps: u64,
}

impl Pacer {
    /// Start tracking at `start_sim`.
    pub fn new(start_sim: SimTime, periodic_stats_interval_secs: Option<u64>) -> Self {
        let now = Instant::now();
        Pacer {
            start_wall: now,
            start_sim,
            periodic_interval: periodic_stats_interval_secs.map(Duration::from_secs),
            last_periodic_stats: now,
            last_periodic_event_count: 0,
            total_sleep: Duration::ZERO,
            interrupted_sleeps: 0,
        }
    }

    /// Sleep for `delay` unless a stop is requested first.
    ///
    /// Returns false if the sleep was cut short.
    pub fn sleep(&mut self, delay: Duration, control: &RunControl) -> bool {
        let started = Instant::now();
        let deadline = started + delay;
        let completed = loop {
            if control.is_stop_requested() {
                break false;
            }
            let now = Instant::now();
            if now >= deadline {
                break true;
            }
            thread::park_timeout(deadline - now);
        };
        self.total_sleep += started.elapsed();
        if !completed {
            self.interrupted_sleeps += 1;
        }
        completed
    }

    /// Return progress statistics once per configured interval.
    pub fn check_periodic_stats(
        &mut self,
        current_sim_time: SimTime,
        total_events: u64,
    ) -> Option<PeriodicStats> {
        let interval = self.periodic_interval?;
        let now = Instant::now();
        let elapsed_since_last = now.duration_since(self.last_periodic_stats);
        if elapsed_since_last < interval {
            return None;
        }

        let wall_elapsed = self.start_wall.elapsed();
        let sim_elapsed_ms = current_sim_time.saturating_since(self.start_sim);
        let sim_to_realtime_ratio = if wall_elapsed.as_secs_f64() > 0.0 {
            (sim_elapsed_ms as f64 / 1000.0) / wall_elapsed.as_secs_f64()
        } else {
            0.0
        };

        let events_since_last = total_events.saturating_sub(self.last_periodic_event_count);
        let event_rate_real = events_since_last as f64 / elapsed_since_last.as_secs_f64();
        let event_rate_sim = if sim_to_realtime_ratio > 0.0 {
            event_rate_real / sim_to_realtime_ratio
        } else {
            0.0
        };

        self.last_periodic_stats = now;
        self.last_periodic_event_count = total_events;

        Some(PeriodicStats {
            sim_time: current_sim_time,
            wall_elapsed,
            sim_to_realtime_ratio,
            total_events,
            event_rate_real,
            event_rate_sim,
        })
    }

    /// Totals for the session.
    pub fn stats(&self) -> PacerStats {
        PacerStats {
            elapsed_wall: self.start_wall.elapsed(),
            total_sleep: self.total_sleep,
            interrupted_sleeps: self.interrupted_sleeps,
        }
    }
}

/// Totals from a pacing session.
#[derive(Debug, Clone)]
pub struct PacerStats {
    /// Wall time since the pacer was created.
    pub elapsed_wall: Duration,
    /// Wall time spent in throttle sleeps.
    pub total_sleep: Duration,
    /// Sleeps cut short by a stop request.
    pub interrupted_sleeps: u64,
}

/// Progress report emitted during a run.
#[derive(Debug, Clone)]
pub struct PeriodicStats {
    /// Current simulation time.
    pub sim_time: SimTime,
    /// Wall time since the run started.
    pub wall_elapsed: Duration,
    /// Simulated seconds per wall second.
    pub sim_to_realtime_ratio: f64,
    /// Events dispatched so far.
    pub total_events: u64,
    /// Events per wall second over the last interval.
    pub event_rate_real: f64,
    /// Events per simulated second over the last interval.
    pub event_rate_sim: f64,
}
