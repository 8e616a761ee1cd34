//! Metric declarations for motesim.
//!
//! Every metric the simulator records is declared once in [`metric_defs`] as a
//! const [`Metric`], so names are never spelled out at the recording site.
//! Recording goes through the [`metrics`] facade, re-exported here; without an
//! installed recorder the calls are no-ops.
//!
//! ```rust
//! use motesim_metrics::{metric_defs, MoteLabels};
//!
//! let labels = MoteLabels::new(3, "fine").to_labels();
//! metrics::counter!(metric_defs::RADIO_TX_STARTED.name, &labels).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonically increasing counter.
    Counter,
    /// Value that can go up and down.
    Gauge,
    /// Distribution of samples.
    Histogram,
}

impl MetricKind {
    /// Lowercase name of the kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// ```rust
/// use motesim_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const FRAMES: Metric = Metric::counter("motesim.test.frames")
///     .with_description("Frames seen")
///     .with_unit(Unit::Count)
///     .with_labels(&["mote"]);
///
/// assert_eq!(FRAMES.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// Metric name, e.g. `motesim.medium.collisions`.
    pub name: &'static str,
    /// Counter, gauge or histogram.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// Unit of measurement.
    pub unit: Option<Unit>,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Declare a counter.
    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    /// Declare a gauge.
    pub const fn gauge(name: &'static str) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

    /// Declare a histogram.
    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    /// Set the description.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Set the unit.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Set the expected label keys.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Register the description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }
}

/// All metric definitions for the simulator.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Labels present on all mote-scoped metrics.
    pub const MOTE_LABELS: &[&str] = &["mote", "mote_kind"];

    /// Labels on radio and driver metrics, which only know the mote ID.
    pub const RADIO_LABELS: &[&str] = &["mote"];

    // ========================================================================
    // Scheduler
    // ========================================================================

    /// Events popped from the queue and executed.
    pub const SCHEDULER_EVENTS: Metric = Metric::counter("motesim.scheduler.events")
        .with_description("Events dispatched by the scheduler")
        .with_unit(Unit::Count);

    /// Full sweeps over the fine motes.
    pub const SCHEDULER_FINE_SWEEPS: Metric = Metric::counter("motesim.scheduler.fine_sweeps")
        .with_description("Sweeps over cycle-accurate motes")
        .with_unit(Unit::Count);

    /// Sweeps needed before the fine motes settled in one millisecond.
    pub const SCHEDULER_SWEEPS_PER_TICK: Metric =
        Metric::histogram("motesim.scheduler.sweeps_per_tick")
            .with_description("Fine mote sweeps per simulated millisecond")
            .with_unit(Unit::Count);

    /// Runs stopped by a mote fault.
    pub const SCHEDULER_MOTE_FAULTS: Metric = Metric::counter("motesim.scheduler.mote_faults")
        .with_description("Mote faults that stopped a run")
        .with_unit(Unit::Count)
        .with_labels(MOTE_LABELS);

    /// Number of motes in the simulation.
    pub const SCHEDULER_MOTES: Metric = Metric::gauge("motesim.scheduler.motes")
        .with_description("Motes in the simulation")
        .with_unit(Unit::Count);

    // ========================================================================
    // Radio medium
    // ========================================================================

    /// Transmissions started.
    pub const RADIO_TX_STARTED: Metric = Metric::counter("motesim.radio.tx_started")
        .with_description("Transmissions started")
        .with_unit(Unit::Count)
        .with_labels(RADIO_LABELS);

    /// Packets delivered to a receiver.
    pub const RADIO_RX_PACKETS: Metric = Metric::counter("motesim.radio.rx_packets")
        .with_description("Packets delivered to receivers")
        .with_unit(Unit::Count)
        .with_labels(RADIO_LABELS);

    /// Delivered payload size.
    pub const RADIO_RX_PACKET_SIZE: Metric = Metric::histogram("motesim.radio.rx_packet_size_bytes")
        .with_description("Delivered payload size in bytes")
        .with_unit(Unit::Bytes);

    /// Receptions corrupted by a collision.
    pub const RADIO_COLLISIONS: Metric = Metric::counter("motesim.radio.collisions")
        .with_description("Receptions corrupted by overlapping transmissions")
        .with_unit(Unit::Count)
        .with_labels(RADIO_LABELS);

    /// Packets rejected for having no payload.
    pub const RADIO_EMPTY_PACKETS: Metric = Metric::counter("motesim.radio.empty_packets")
        .with_description("Transmitted packets rejected for having no payload")
        .with_unit(Unit::Count);

    /// Deliveries that failed at the receiving radio.
    pub const RADIO_DELIVERY_FAILURES: Metric = Metric::counter("motesim.radio.delivery_failures")
        .with_description("Deliveries refused by the receiving radio")
        .with_unit(Unit::Count)
        .with_labels(RADIO_LABELS);

    // ========================================================================
    // Byte-level driver
    // ========================================================================

    /// Outbound transmissions abandoned after going quiet.
    pub const DRIVER_TX_ABANDONED: Metric = Metric::counter("motesim.driver.tx_abandoned")
        .with_description("Byte transmissions abandoned after the inactivity window")
        .with_unit(Unit::Count)
        .with_labels(RADIO_LABELS);

    /// Inbound frames dropped before the chip consumed them.
    pub const DRIVER_DELIVERIES_DROPPED: Metric =
        Metric::counter("motesim.driver.deliveries_dropped")
            .with_description("Inbound frames dropped because the chip never became ready")
            .with_unit(Unit::Count)
            .with_labels(RADIO_LABELS);

    /// Inbound bytes the chip refused.
    pub const DRIVER_BYTES_DROPPED: Metric = Metric::counter("motesim.driver.bytes_dropped")
        .with_description("Inbound bytes lost because the receive flag was still set")
        .with_unit(Unit::Count)
        .with_labels(RADIO_LABELS);

    /// All defined metrics.
    pub const ALL: &[&Metric] = &[
        &SCHEDULER_EVENTS,
        &SCHEDULER_FINE_SWEEPS,
        &SCHEDULER_SWEEPS_PER_TICK,
        &SCHEDULER_MOTE_FAULTS,
        &SCHEDULER_MOTES,
        &RADIO_TX_STARTED,
        &RADIO_RX_PACKETS,
        &RADIO_RX_PACKET_SIZE,
        &RADIO_COLLISIONS,
        &RADIO_EMPTY_PACKETS,
        &RADIO_DELIVERY_FAILURES,
        &DRIVER_TX_ABANDONED,
        &DRIVER_DELIVERIES_DROPPED,
        &DRIVER_BYTES_DROPPED,
    ];
}

/// Labels identifying a mote.
#[derive(Debug, Clone)]
pub struct MoteLabels {
    /// Mote ID.
    pub mote: u32,
    /// Scheduling class (`coarse` or `fine`).
    pub mote_kind: &'static str,
}

impl MoteLabels {
    /// Create labels for a mote.
    pub fn new(mote: u32, mote_kind: &'static str) -> Self {
        MoteLabels { mote, mote_kind }
    }

    /// Convert to label pairs for the `metrics` macros.
    pub fn to_labels(&self) -> [(&'static str, String); 2] {
        [
            ("mote", self.mote.to_string()),
            ("mote_kind", self.mote_kind.to_string()),
        ]
    }
}

/// Register every metric description with the installed recorder.
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mote_labels() {
        let labels = MoteLabels::new(4, "coarse").to_labels();
        assert_eq!(labels.len(), 2);
        assert!(labels.contains(&("mote", "4".to_string())));
        assert!(labels.contains(&("mote_kind", "coarse".to_string())));
    }

    #[test]
    fn test_metric_definitions() {
        assert_eq!(metric_defs::RADIO_COLLISIONS.name, "motesim.radio.collisions");
        assert_eq!(metric_defs::RADIO_COLLISIONS.kind, MetricKind::Counter);
        assert_eq!(metric_defs::SCHEDULER_MOTES.kind, MetricKind::Gauge);
        assert_eq!(
            metric_defs::SCHEDULER_SWEEPS_PER_TICK.kind,
            MetricKind::Histogram
        );
        assert_eq!(metric_defs::DRIVER_TX_ABANDONED.labels, metric_defs::RADIO_LABELS);
        assert_eq!(metric_defs::SCHEDULER_MOTE_FAULTS.labels, metric_defs::MOTE_LABELS);
    }

    #[test]
    fn test_metric_names_unique() {
        let mut names: Vec<_> = metric_defs::ALL.iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());
    }

    #[test]
    fn test_describe_without_recorder() {
        describe_metrics();
    }

    #[test]
    fn test_metric_minimal() {
        const MINIMAL: Metric = Metric::gauge("minimal");
        assert_eq!(MINIMAL.description, "");
        assert_eq!(MINIMAL.unit, None);
        assert_eq!(MINIMAL.labels, &[] as &[&str]);
    }
}
