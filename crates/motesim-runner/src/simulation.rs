//! The simulation loop.
//!
//! A [`Simulation`] owns the event queue, the motes and the radio medium and
//! runs entirely on one thread. Three recurring actions keep it moving:
//!
//! - [`Action::FineSweep`] ticks every fine mote, repeating the whole sweep
//!   while any mote reports more work in the current millisecond.
//! - [`Action::CoarseTick`] ticks every coarse mote once.
//! - [`Action::Throttle`] sleeps the configured delay; it is only queued while
//!   the delay is positive.
//!
//! They are enqueued in that order and each reschedules itself one
//! millisecond later, so equal-time FIFO ordering keeps them in that order
//! within every millisecond.
//!
//! Motes report timers and radio notifications through a [`SimContext`].
//! After every call into a mote the context is drained: timers become
//! [`Action::MoteTimer`] events, notifications go to the medium and to
//! subscribers, until nothing is left.

use crate::config::SimulationConfig;
use crate::pacing::{Pacer, RunControl};
use crate::watchdog::{CurrentEventInfo, WatchdogState};
use crossbeam_channel::{unbounded, Receiver, Sender};
use motesim_common::tracer::{MoteTracer, MoteTracerConfig};
use motesim_common::{
    Event, EventQueue, Mote, MoteError, MoteId, MoteKind, Radio, RadioDirectory,
    RadioNotification, SimContext, SimError, SimTime, TimerKind,
};
use motesim_metrics::{metric_defs, MoteLabels};
use motesim_radio::{MediumSnapshot, RadioMedium};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

// ============================================================================
// Actions
// ============================================================================

/// A user-scheduled event.
pub trait TimeEvent: Send {
    /// Name shown in logs and watchdog alerts.
    fn name(&self) -> &str {
        "custom"
    }

    /// Run the event. Returning a time reschedules it.
    fn execute(&mut self, sim: &mut Simulation) -> Result<Option<SimTime>, SimError>;
}

/// A [`TimeEvent`] backed by a closure.
pub struct FnEvent<F> {
    name: String,
    f: F,
}

impl<F> FnEvent<F>
where
    F: FnMut(&mut Simulation) -> Result<Option<SimTime>, SimError> + Send,
{
    /// Wrap a closure.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        FnEvent {
            name: name.into(),
            f,
        }
    }
}

impl<F> TimeEvent for FnEvent<F>
where
    F: FnMut(&mut Simulation) -> Result<Option<SimTime>, SimError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, sim: &mut Simulation) -> Result<Option<SimTime>, SimError> {
        (self.f)(sim)
    }
}

/// What an event does when dispatched.
pub enum Action {
    /// Sweep the fine motes until they are idle.
    FineSweep,
    /// Tick every coarse mote once.
    CoarseTick,
    /// Sleep the pacing delay.
    Throttle,
    /// Deliver a timer to a mote.
    MoteTimer {
        /// Target mote.
        mote: MoteId,
        /// Which timer.
        timer: TimerKind,
    },
    /// User-scheduled event.
    Custom(Box<dyn TimeEvent>),
}

impl Action {
    /// Name for logs.
    pub fn name(&self) -> &str {
        match self {
            Action::FineSweep => "fine_sweep",
            Action::CoarseTick => "coarse_tick",
            Action::Throttle => "throttle",
            Action::MoteTimer { .. } => "mote_timer",
            Action::Custom(event) => event.name(),
        }
    }

    /// Mote the action targets, if any.
    pub fn mote(&self) -> Option<MoteId> {
        match self {
            Action::MoteTimer { mote, .. } => Some(*mote),
            _ => None,
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::MoteTimer { mote, timer } => f
                .debug_struct("MoteTimer")
                .field("mote", mote)
                .field("timer", timer)
                .finish(),
            Action::Custom(event) => f.debug_tuple("Custom").field(&event.name()).finish(),
            other => f.write_str(other.name()),
        }
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Why a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// A stop was requested.
    Requested,
    /// No events remained.
    QueueEmpty,
    /// The next event was past the run's time limit.
    TimeLimit,
    /// A single-millisecond step finished.
    TickCompleted,
    /// A fatal error.
    Fault(SimError),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Requested => f.write_str("stop requested"),
            StopReason::QueueEmpty => f.write_str("event queue empty"),
            StopReason::TimeLimit => f.write_str("time limit reached"),
            StopReason::TickCompleted => f.write_str("tick completed"),
            StopReason::Fault(e) => write!(f, "fault: {}", e),
        }
    }
}

/// Events published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationEvent {
    /// A run started.
    Started {
        /// Simulation time at start.
        time: SimTime,
    },
    /// A run ended.
    Stopped {
        /// Simulation time at stop.
        time: SimTime,
        /// Why.
        reason: StopReason,
    },
    /// Every mote was ticked for this millisecond.
    TickPerformed(SimTime),
    /// A radio changed state.
    Radio(RadioNotification),
    /// A mote joined.
    MoteAdded(MoteId),
    /// A mote left.
    MoteRemoved(MoteId),
}

/// Subscriber channels. Disconnected receivers are pruned on publish.
#[derive(Debug, Clone, Default)]
pub struct Subscribers {
    inner: Arc<Mutex<Vec<Sender<SimulationEvent>>>>,
}

impl Subscribers {
    /// Open a new subscription.
    pub fn subscribe(&self) -> Receiver<SimulationEvent> {
        let (tx, rx) = unbounded();
        self.inner.lock().push(tx);
        rx
    }

    /// Number of open subscriptions.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Send `event` to every subscriber.
    pub fn publish(&self, event: SimulationEvent) {
        let mut subscribers = self.inner.lock();
        if subscribers.is_empty() {
            return;
        }
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// State readable from other threads while the simulation runs.
#[derive(Debug, Clone, Default)]
pub struct SharedView {
    time: Arc<AtomicU64>,
    snapshot: Arc<Mutex<MediumSnapshot>>,
}

impl SharedView {
    /// Time of the last dispatched event.
    pub fn simulation_time(&self) -> SimTime {
        SimTime::from_millis(self.time.load(Ordering::Relaxed))
    }

    /// Latest medium snapshot.
    pub fn medium_snapshot(&self) -> MediumSnapshot {
        self.snapshot.lock().clone()
    }
}

// ============================================================================
// Motes
// ============================================================================

/// The motes of a simulation, in registration order.
#[derive(Default)]
pub struct MoteSet {
    motes: Vec<Box<dyn Mote>>,
    index: BTreeMap<MoteId, usize>,
}

impl MoteSet {
    /// Number of motes.
    pub fn len(&self) -> usize {
        self.motes.len()
    }

    /// Whether there are no motes.
    pub fn is_empty(&self) -> bool {
        self.motes.is_empty()
    }

    /// Whether a mote is present.
    pub fn contains(&self, mote: MoteId) -> bool {
        self.index.contains_key(&mote)
    }

    /// Look up a mote.
    pub fn get(&self, mote: MoteId) -> Option<&dyn Mote> {
        let i = *self.index.get(&mote)?;
        self.motes.get(i).map(|m| m.as_ref())
    }

    /// Look up a mote.
    pub fn get_mut(&mut self, mote: MoteId) -> Option<&mut Box<dyn Mote>> {
        let i = *self.index.get(&mote)?;
        self.motes.get_mut(i)
    }

    /// Mote IDs in registration order.
    pub fn ids(&self) -> impl Iterator<Item = MoteId> + '_ {
        self.motes.iter().map(|m| m.id())
    }

    fn insert(&mut self, mote: Box<dyn Mote>) {
        self.index.insert(mote.id(), self.motes.len());
        self.motes.push(mote);
    }

    fn remove(&mut self, mote: MoteId) -> Option<Box<dyn Mote>> {
        let i = self.index.remove(&mote)?;
        let removed = self.motes.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        Some(removed)
    }
}

impl RadioDirectory for MoteSet {
    fn radio_mut(&mut self, mote: MoteId) -> Option<&mut dyn Radio> {
        self.get_mut(mote)?.radio_mut()
    }
}

// ============================================================================
// Simulation
// ============================================================================

/// Cumulative counters for a simulation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimulationStats {
    /// Events dispatched.
    pub events_dispatched: u64,
    /// Fine mote sweeps.
    pub fine_sweeps: u64,
    /// Coarse tick rounds.
    pub coarse_ticks: u64,
    /// Individual `tick()` calls.
    pub mote_ticks: u64,
    /// Timers delivered to motes.
    pub mote_timers: u64,
    /// User events run.
    pub custom_events: u64,
    /// Throttle sleeps.
    pub throttle_sleeps: u64,
    /// Radio notifications routed.
    pub radio_notifications: u64,
    /// Fatal mote faults.
    pub mote_faults: u64,
}

/// A discrete-event mote simulation.
pub struct Simulation {
    config: SimulationConfig,
    queue: EventQueue<Action>,
    motes: MoteSet,
    coarse: Vec<MoteId>,
    fine: Vec<MoteId>,
    medium: RadioMedium,
    subscribers: Subscribers,
    shared: SharedView,
    watchdog: Option<Arc<WatchdogState>>,
    tracer: MoteTracer,
    rng: ChaCha8Rng,
    pacer: Pacer,
    delay_ms: u64,
    stats: SimulationStats,
    fine_queued: bool,
    coarse_queued: bool,
    throttle_queued: bool,
    last_stop: Option<StopReason>,
}

impl Simulation {
    /// Create an empty simulation on `medium`.
    pub fn new(config: SimulationConfig, medium: RadioMedium) -> Self {
        let tracer = match &config.trace {
            Some(spec) => MoteTracer::new(MoteTracerConfig::from_spec(spec)),
            None => MoteTracer::disabled(),
        };
        let medium = medium.with_tracer(tracer.clone());
        let shared = SharedView::default();
        *shared.snapshot.lock() = medium.snapshot();

        Simulation {
            rng: ChaCha8Rng::seed_from_u64(config.random_seed),
            pacer: Pacer::new(SimTime::ZERO, config.periodic_stats_interval_secs),
            delay_ms: config.delay_ms,
            config,
            queue: EventQueue::new(),
            motes: MoteSet::default(),
            coarse: Vec::new(),
            fine: Vec::new(),
            medium,
            subscribers: Subscribers::default(),
            shared,
            watchdog: None,
            tracer,
            stats: SimulationStats::default(),
            fine_queued: false,
            coarse_queued: false,
            throttle_queued: false,
            last_stop: None,
        }
    }

    /// Report dispatch progress to a watchdog.
    pub fn set_watchdog(&mut self, state: Arc<WatchdogState>) {
        for id in self.motes.ids() {
            if let Some(name) = self.motes.get(id).and_then(|m| m.name()) {
                state.register_mote_name(id, name);
            }
        }
        self.watchdog = Some(state);
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Current simulation time.
    pub fn now(&self) -> SimTime {
        self.queue.now()
    }

    /// Engine settings.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// The radio medium.
    pub fn medium(&self) -> &RadioMedium {
        &self.medium
    }

    /// The motes.
    pub fn motes(&self) -> &MoteSet {
        &self.motes
    }

    /// Look up a mote.
    pub fn mote(&self, mote: MoteId) -> Option<&dyn Mote> {
        self.motes.get(mote)
    }

    /// Coarse motes in tick order.
    pub fn coarse_motes(&self) -> &[MoteId] {
        &self.coarse
    }

    /// Fine motes in sweep order.
    pub fn fine_motes(&self) -> &[MoteId] {
        &self.fine
    }

    /// Number of queued events.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Time of the next queued event.
    pub fn next_event_time(&self) -> Option<SimTime> {
        self.queue.peek_time()
    }

    /// Counters.
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Subscriber list shared with the scheduler.
    pub fn subscribers(&self) -> &Subscribers {
        &self.subscribers
    }

    /// Open a subscription.
    pub fn subscribe(&self) -> Receiver<SimulationEvent> {
        self.subscribers.subscribe()
    }

    /// Cross-thread view of time and medium state.
    pub fn shared_view(&self) -> SharedView {
        self.shared.clone()
    }

    /// Why the last run ended.
    pub fn last_stop_reason(&self) -> Option<&StopReason> {
        self.last_stop.as_ref()
    }

    /// Current pacing delay.
    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    // ------------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------------

    /// Schedule a user event.
    pub fn schedule_event(
        &mut self,
        event: Box<dyn TimeEvent>,
        time: SimTime,
    ) -> Result<u64, SimError> {
        self.queue.schedule(Action::Custom(event), time)
    }

    /// Change the pacing delay.
    pub fn set_delay(&mut self, delay_ms: u64) -> Result<(), SimError> {
        debug!("Pacing delay {} -> {} ms", self.delay_ms, delay_ms);
        self.delay_ms = delay_ms;
        // Arms the throttle behind this millisecond's sweep and coarse tick.
        self.ensure_recurring()
    }

    /// Add a mote and register its radio with the medium.
    pub fn add_mote(&mut self, mut mote: Box<dyn Mote>) -> Result<(), SimError> {
        let id = mote.id();
        if self.motes.contains(id) {
            return Err(SimError::DuplicateMote(id));
        }

        let max_delay = self.config.max_mote_startup_delay_ms;
        if max_delay > 0 {
            let delay = self.rng.gen_range(0..max_delay);
            debug!("{} starts after {} ms", id, delay);
            mote.set_clock_drift(-(delay as i64));
        }

        if mote.radio().is_some() {
            self.medium.register_mote(id, mote.position());
        }
        if let (Some(watchdog), Some(name)) = (&self.watchdog, mote.name()) {
            watchdog.register_mote_name(id, name);
        }

        let kind = mote.kind();
        match kind {
            MoteKind::Coarse => self.coarse.push(id),
            MoteKind::Fine => self.fine.push(id),
        }
        self.motes.insert(mote);
        info!("Added {} ({})", id, kind_label(Some(kind)));

        metrics::gauge!(metric_defs::SCHEDULER_MOTES.name).set(self.motes.len() as f64);
        self.refresh_snapshot();
        self.subscribers.publish(SimulationEvent::MoteAdded(id));
        Ok(())
    }

    /// Remove a mote, unregistering its radio and dropping its timers.
    pub fn remove_mote(&mut self, id: MoteId) -> Result<Box<dyn Mote>, SimError> {
        if !self.motes.contains(id) {
            return Err(SimError::UnknownMote(id));
        }

        let mut ctx = SimContext::new(self.queue.now());
        self.medium.unregister_mote(id, &mut self.motes, &mut ctx);
        self.queue.retain(|action| action.mote() != Some(id));
        self.coarse.retain(|m| *m != id);
        self.fine.retain(|m| *m != id);
        let mote = self.motes.remove(id).ok_or(SimError::UnknownMote(id))?;
        self.absorb(ctx)?;
        info!("Removed {}", id);

        metrics::gauge!(metric_defs::SCHEDULER_MOTES.name).set(self.motes.len() as f64);
        self.refresh_snapshot();
        self.subscribers.publish(SimulationEvent::MoteRemoved(id));
        Ok(mote)
    }

    // ------------------------------------------------------------------------
    // Running
    // ------------------------------------------------------------------------

    /// Dispatch the earliest event. Returns its time, or `None` if the queue
    /// is empty.
    pub fn step(&mut self, control: &RunControl) -> Result<Option<SimTime>, SimError> {
        self.ensure_recurring()?;
        let Some(event) = self.queue.pop_earliest() else {
            return Ok(None);
        };
        let time = event.time;
        self.shared.time.store(time.as_millis(), Ordering::Relaxed);
        self.dispatch(event, control)?;
        Ok(Some(time))
    }

    /// Dispatch every event of the next millisecond.
    pub fn tick_once(&mut self, control: &RunControl) -> Result<Option<SimTime>, SimError> {
        self.ensure_recurring()?;
        let Some(time) = self.queue.peek_time() else {
            return Ok(None);
        };
        while self.queue.peek_time() == Some(time) {
            self.step(control)?;
        }
        self.last_stop = Some(StopReason::TickCompleted);
        Ok(Some(time))
    }

    /// Dispatch events until the queue is empty, a stop is requested, a
    /// fault occurs or the next event lies after `limit`.
    pub fn run(&mut self, control: &RunControl, limit: Option<SimTime>) -> StopReason {
        let start = self.queue.now();
        self.pacer = Pacer::new(start, self.config.periodic_stats_interval_secs);
        info!("Simulation started at {}", start);
        self.subscribers.publish(SimulationEvent::Started { time: start });

        let reason = loop {
            if control.is_stop_requested() {
                break StopReason::Requested;
            }
            if let Err(e) = self.ensure_recurring() {
                break StopReason::Fault(e);
            }
            let Some(next) = self.queue.peek_time() else {
                break StopReason::QueueEmpty;
            };
            if limit.is_some_and(|l| next > l) {
                break StopReason::TimeLimit;
            }
            if let Err(e) = self.step(control) {
                error!("Simulation stopped: {}", e);
                break StopReason::Fault(e);
            }
            if let Some(stats) = self
                .pacer
                .check_periodic_stats(self.queue.now(), self.stats.events_dispatched)
            {
                info!(
                    "{} | {:.2}x realtime | {} events ({:.0}/s wall, {:.0}/s sim)",
                    stats.sim_time,
                    stats.sim_to_realtime_ratio,
                    stats.total_events,
                    stats.event_rate_real,
                    stats.event_rate_sim
                );
            }
        };

        let time = self.queue.now();
        let pacing = self.pacer.stats();
        info!(
            "Simulation stopped at {} ({}); {:.3}s wall, {:.3}s asleep",
            time,
            reason,
            pacing.elapsed_wall.as_secs_f64(),
            pacing.total_sleep.as_secs_f64()
        );
        self.subscribers.publish(SimulationEvent::Stopped {
            time,
            reason: reason.clone(),
        });
        self.last_stop = Some(reason.clone());
        reason
    }

    /// Run on the calling thread until `limit`.
    pub fn run_until(&mut self, limit: SimTime) -> StopReason {
        self.run(&RunControl::new(), Some(limit))
    }

    fn ensure_recurring(&mut self) -> Result<(), SimError> {
        let now = self.queue.now();
        if !self.fine_queued {
            self.queue.schedule(Action::FineSweep, now)?;
            self.fine_queued = true;
        }
        if !self.coarse_queued {
            self.queue.schedule(Action::CoarseTick, now)?;
            self.coarse_queued = true;
        }
        if self.delay_ms > 0 && !self.throttle_queued {
            self.queue.schedule(Action::Throttle, now)?;
            self.throttle_queued = true;
        }
        Ok(())
    }

    fn reschedule(&mut self, action: Action) -> Result<(), SimError> {
        let at = self.queue.now().next_tick();
        self.queue.schedule(action, at).map(|_| ())
    }

    fn dispatch(&mut self, event: Event<Action>, control: &RunControl) -> Result<(), SimError> {
        self.stats.events_dispatched += 1;
        metrics::counter!(metric_defs::SCHEDULER_EVENTS.name).increment(1);
        if let Some(watchdog) = &self.watchdog {
            watchdog.set_current_event(Some(CurrentEventInfo::new(
                self.stats.events_dispatched,
                event.sequence,
                event.time,
                event.action.name(),
            )));
        }

        let result = match event.action {
            Action::FineSweep => self.fine_sweep(),
            Action::CoarseTick => self.coarse_tick(),
            Action::Throttle => self.throttle(control),
            Action::MoteTimer { mote, timer } => self.fire_timer(mote, timer),
            Action::Custom(custom) => self.run_custom(custom),
        };

        if let Some(watchdog) = &self.watchdog {
            watchdog.set_current_event(None);
        }
        result
    }

    fn fine_sweep(&mut self) -> Result<(), SimError> {
        self.fine_queued = false;
        let mut sweeps = 0u64;
        if !self.fine.is_empty() {
            loop {
                sweeps += 1;
                let mut more_work = false;
                for i in 0..self.fine.len() {
                    let id = self.fine[i];
                    more_work |= self.tick_mote(id)?;
                }
                if !more_work {
                    break;
                }
            }
            self.stats.fine_sweeps += sweeps;
            metrics::counter!(metric_defs::SCHEDULER_FINE_SWEEPS.name).increment(sweeps);
            metrics::histogram!(metric_defs::SCHEDULER_SWEEPS_PER_TICK.name).record(sweeps as f64);
        }
        self.reschedule(Action::FineSweep)?;
        self.fine_queued = true;
        Ok(())
    }

    fn coarse_tick(&mut self) -> Result<(), SimError> {
        self.coarse_queued = false;
        for i in 0..self.coarse.len() {
            let id = self.coarse[i];
            self.tick_mote(id)?;
        }
        self.stats.coarse_ticks += 1;
        self.reschedule(Action::CoarseTick)?;
        self.coarse_queued = true;
        self.subscribers
            .publish(SimulationEvent::TickPerformed(self.queue.now()));
        Ok(())
    }

    fn throttle(&mut self, control: &RunControl) -> Result<(), SimError> {
        self.throttle_queued = false;
        if self.delay_ms == 0 {
            return Ok(());
        }
        self.pacer
            .sleep(Duration::from_millis(self.delay_ms), control);
        self.stats.throttle_sleeps += 1;
        self.reschedule(Action::Throttle)?;
        self.throttle_queued = true;
        Ok(())
    }

    fn run_custom(&mut self, mut event: Box<dyn TimeEvent>) -> Result<(), SimError> {
        self.stats.custom_events += 1;
        debug!("Running {} at {}", event.name(), self.queue.now());
        if let Some(at) = event.execute(self)? {
            self.queue.schedule(Action::Custom(event), at)?;
        }
        Ok(())
    }

    fn tick_mote(&mut self, id: MoteId) -> Result<bool, SimError> {
        let more_work = self
            .call_mote(id, |mote, ctx| mote.tick(ctx))?
            .unwrap_or(false);
        self.stats.mote_ticks += 1;
        if self.tracer.is_enabled() {
            let name = self.motes.get(id).and_then(|m| m.name());
            self.tracer.log_tick(name, id, self.queue.now(), more_work);
        }
        Ok(more_work)
    }

    fn fire_timer(&mut self, id: MoteId, timer: TimerKind) -> Result<(), SimError> {
        if self.tracer.is_enabled() {
            let name = self.motes.get(id).and_then(|m| m.name());
            self.tracer.log_timer(name, id, self.queue.now(), timer);
        }
        if self
            .call_mote(id, |mote, ctx| mote.on_timer(timer, ctx))?
            .is_none()
        {
            debug!("Dropped {:?} for missing {}", timer, id);
        }
        self.stats.mote_timers += 1;
        Ok(())
    }

    /// Call into a mote, turning errors and panics into tick faults and
    /// draining the context afterwards. `None` if the mote is gone.
    fn call_mote<R>(
        &mut self,
        id: MoteId,
        f: impl FnOnce(&mut dyn Mote, &mut SimContext) -> Result<R, MoteError>,
    ) -> Result<Option<R>, SimError> {
        let mut ctx = SimContext::new(self.queue.now());
        let Some(mote) = self.motes.get_mut(id) else {
            return Ok(None);
        };
        if let Some(watchdog) = &self.watchdog {
            watchdog.set_current_mote(Some(id));
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(mote.as_mut(), &mut ctx)));
        let value = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => return Err(self.mote_fault(id, e.to_string())),
            Err(payload) => return Err(self.mote_fault(id, panic_message(payload.as_ref()))),
        };
        self.absorb(ctx)?;
        Ok(Some(value))
    }

    fn mote_fault(&mut self, id: MoteId, message: String) -> SimError {
        let now = self.queue.now();
        let kind = self.motes.get(id).map(|m| m.kind());
        error!("{} faulted at {}: {}", id, now, message);
        self.stats.mote_faults += 1;
        let labels = MoteLabels::new(id.0, kind_label(kind)).to_labels();
        metrics::counter!(metric_defs::SCHEDULER_MOTE_FAULTS.name, &labels).increment(1);
        SimError::tick_fault(id, now, message)
    }

    /// Drain a context: enqueue timers, route notifications, repeat.
    fn absorb(&mut self, mut ctx: SimContext) -> Result<(), SimError> {
        let mut routed = false;
        loop {
            for request in ctx.take_timers() {
                self.queue.schedule(
                    Action::MoteTimer {
                        mote: request.mote,
                        timer: request.timer,
                    },
                    request.at,
                )?;
            }
            let notifications = ctx.take_notifications();
            if notifications.is_empty() {
                break;
            }
            routed = true;
            for notification in &notifications {
                self.stats.radio_notifications += 1;
                if self.tracer.is_enabled() {
                    let name = self.motes.get(notification.mote).and_then(|m| m.name());
                    self.tracer.log_radio(name, notification);
                }
                self.medium
                    .handle_notification(notification, &mut self.motes, &mut ctx);
                self.subscribers
                    .publish(SimulationEvent::Radio(notification.clone()));
            }
        }
        if routed {
            self.refresh_snapshot();
        }
        Ok(())
    }

    fn refresh_snapshot(&self) {
        *self.shared.snapshot.lock() = self.medium.snapshot();
    }
}

fn kind_label(kind: Option<MoteKind>) -> &'static str {
    match kind {
        Some(MoteKind::Coarse) => "coarse",
        Some(MoteKind::Fine) => "fine",
        None => "unknown",
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}
