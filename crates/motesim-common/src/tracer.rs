//! Targeted per-mote trace logging.
//!
//! Regular `tracing` output is filtered by module. The [`MoteTracer`] filters
//! by mote instead, so one or two motes can be followed through a busy run
//! without turning on debug logging everywhere.
//!
//! ```rust,ignore
//! use motesim_common::tracer::{MoteTracer, MoteTracerConfig};
//!
//! let tracer = MoteTracer::new(MoteTracerConfig::from_spec("sender,mote:3"));
//! if tracer.should_trace(Some("sender"), MoteId::new(1)) {
//!     tracer.log_state_change(Some("sender"), MoteId::new(1), now, "booted");
//! }
//! ```
//!
//! Trace lines are emitted at `info` level on the [`TRACE_TARGET`] target.

use crate::{MoteId, RadioNotification, SimTime, TimerKind};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// `tracing` target used for trace lines.
pub const TRACE_TARGET: &str = "motesim_trace";

// ============================================================================
// Trace Event Types
// ============================================================================

/// Categories of trace events for filtering and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceCategory {
    /// Mote ticked.
    Tick,
    /// Radio notification.
    Radio,
    /// Packet handed to a receiver.
    Delivery,
    /// Timer scheduled or fired.
    Timer,
    /// State change within the mote.
    StateChange,
    /// Custom/debug trace point.
    Custom,
}

impl fmt::Display for TraceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceCategory::Tick => write!(f, "TICK"),
            TraceCategory::Radio => write!(f, "RADIO"),
            TraceCategory::Delivery => write!(f, "DELIVERY"),
            TraceCategory::Timer => write!(f, "TIMER"),
            TraceCategory::StateChange => write!(f, "STATE"),
            TraceCategory::Custom => write!(f, "TRACE"),
        }
    }
}

/// A trace event record.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    /// Name of the mote (if available).
    pub mote_name: Option<String>,
    /// Mote ID.
    pub mote: MoteId,
    /// Simulation time when the event occurred.
    pub sim_time: SimTime,
    /// Category of the trace event.
    pub category: TraceCategory,
    /// Human-readable description.
    pub description: String,
    /// Additional key-value details.
    pub details: Vec<(String, String)>,
}

impl TraceEvent {
    /// Create a trace event of the given category.
    pub fn new(
        category: TraceCategory,
        mote_name: Option<&str>,
        mote: MoteId,
        sim_time: SimTime,
        description: impl Into<String>,
    ) -> Self {
        TraceEvent {
            mote_name: mote_name.map(|s| s.to_string()),
            mote,
            sim_time,
            category,
            description: description.into(),
            details: Vec::new(),
        }
    }

    /// Add a detail to this event.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.details.push((key.into(), value.to_string()));
        self
    }
}

// ============================================================================
// Tracer Configuration
// ============================================================================

/// Which motes and categories to trace.
#[derive(Debug, Clone, Default)]
pub struct MoteTracerConfig {
    /// Mote names to trace; `"*"` traces every mote.
    pub traced_names: HashSet<String>,
    /// Mote IDs to trace.
    pub traced_ids: HashSet<u32>,
    /// Categories to trace. If empty, all categories are traced.
    pub traced_categories: HashSet<TraceCategory>,
}

impl MoteTracerConfig {
    /// A config that traces nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Parse a comma-separated list of mote names, `mote:<id>` entries and `*`.
    ///
    /// Unparsable IDs are ignored.
    pub fn from_spec(spec: &str) -> Self {
        let mut config = Self::none();
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if let Some(id) = part.strip_prefix("mote:") {
                if let Ok(id) = id.parse::<u32>() {
                    config.traced_ids.insert(id);
                }
            } else {
                config.traced_names.insert(part.to_string());
            }
        }
        config
    }

    /// Whether tracing is enabled at all.
    pub fn is_enabled(&self) -> bool {
        !self.traced_names.is_empty() || !self.traced_ids.is_empty()
    }

    /// Whether every mote is traced.
    pub fn traces_all(&self) -> bool {
        self.traced_names.contains("*")
    }

    /// Whether a mote should be traced (by name or ID).
    pub fn should_trace(&self, name: Option<&str>, mote: MoteId) -> bool {
        if self.traces_all() || self.traced_ids.contains(&mote.0) {
            return true;
        }
        name.is_some_and(|n| self.traced_names.contains(n))
    }

    /// Whether a category should be traced.
    pub fn should_trace_category(&self, category: TraceCategory) -> bool {
        self.traced_categories.is_empty() || self.traced_categories.contains(&category)
    }

    /// Restrict tracing to a category (may be called repeatedly).
    pub fn with_category(mut self, category: TraceCategory) -> Self {
        self.traced_categories.insert(category);
        self
    }
}

// ============================================================================
// Mote Tracer
// ============================================================================

/// Shared, cheaply cloneable tracer.
#[derive(Clone, Default)]
pub struct MoteTracer {
    config: Arc<MoteTracerConfig>,
}

impl MoteTracer {
    /// Create a tracer with the given configuration.
    pub fn new(config: MoteTracerConfig) -> Self {
        MoteTracer {
            config: Arc::new(config),
        }
    }

    /// A tracer that traces nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Whether tracing is enabled at all.
    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    /// Whether a mote should be traced.
    pub fn should_trace(&self, name: Option<&str>, mote: MoteId) -> bool {
        self.config.should_trace(name, mote)
    }

    /// The tracer configuration.
    pub fn config(&self) -> &MoteTracerConfig {
        &self.config
    }

    /// Log a trace event if its mote and category are selected.
    pub fn log(&self, event: TraceEvent) {
        if !self.config.should_trace(event.mote_name.as_deref(), event.mote) {
            return;
        }
        if !self.config.should_trace_category(event.category) {
            return;
        }
        self.output_trace(&event);
    }

    /// Log a tick and whether the mote has more work pending.
    pub fn log_tick(&self, name: Option<&str>, mote: MoteId, sim_time: SimTime, more_work: bool) {
        if !self.should_trace(name, mote) {
            return;
        }
        self.log(
            TraceEvent::new(TraceCategory::Tick, name, mote, sim_time, "tick")
                .with_detail("more_work", more_work),
        );
    }

    /// Log a radio notification.
    pub fn log_radio(&self, name: Option<&str>, notification: &RadioNotification) {
        if !self.should_trace(name, notification.mote) {
            return;
        }
        self.log(TraceEvent::new(
            TraceCategory::Radio,
            name,
            notification.mote,
            notification.time,
            format!("{:?}", notification.kind),
        ));
    }

    /// Log a packet delivered to a receiver.
    pub fn log_delivery(
        &self,
        name: Option<&str>,
        mote: MoteId,
        sim_time: SimTime,
        source: MoteId,
        len: usize,
    ) {
        if !self.should_trace(name, mote) {
            return;
        }
        self.log(
            TraceEvent::new(TraceCategory::Delivery, name, mote, sim_time, "packet")
                .with_detail("from", source)
                .with_detail("len", len),
        );
    }

    /// Log a timer firing.
    pub fn log_timer(&self, name: Option<&str>, mote: MoteId, sim_time: SimTime, timer: TimerKind) {
        if !self.should_trace(name, mote) {
            return;
        }
        self.log(TraceEvent::new(
            TraceCategory::Timer,
            name,
            mote,
            sim_time,
            format!("{:?}", timer),
        ));
    }

    /// Log a state change.
    pub fn log_state_change(
        &self,
        name: Option<&str>,
        mote: MoteId,
        sim_time: SimTime,
        description: impl Into<String>,
    ) {
        if !self.should_trace(name, mote) {
            return;
        }
        self.log(TraceEvent::new(
            TraceCategory::StateChange,
            name,
            mote,
            sim_time,
            description,
        ));
    }

    fn output_trace(&self, event: &TraceEvent) {
        let mote_str = match event.mote_name {
            Some(ref name) => format!("{} ({})", name, event.mote),
            None => event.mote.to_string(),
        };

        let details_str = if event.details.is_empty() {
            String::new()
        } else {
            let parts: Vec<String> = event
                .details
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            format!(" [{}]", parts.join(", "))
        };

        tracing::info!(
            target: TRACE_TARGET,
            "{} @ {}: {} {}{}",
            mote_str,
            event.sim_time,
            event.category,
            event.description,
            details_str
        );
    }
}
