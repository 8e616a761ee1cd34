//! Scripted motes and scenario assembly.
//!
//! Scenario files describe motes by behavior rather than firmware:
//!
//! - [`BeaconMote`] is a coarse mote with a [`PacketRadio`] that sends a
//!   fixed-size payload every period and counts what it hears.
//! - [`ByteMote`] is a fine mote with a [`ByteRadio`] over an
//!   [`EmulatedChip`]. It spends a CPU cycle budget per millisecond writing
//!   frames byte by byte and reading inbound bytes from the chip, the way
//!   interrupt-driven firmware would.

use crate::config::{MoteBehavior, MoteConfig, RunnerError, ScenarioConfig};
use crate::simulation::{Simulation, SimulationStats, StopReason};
use motesim_common::{
    CpuCycles, CyclesPerMs, Mote, MoteError, MoteId, MoteKind, Position, Radio, SimContext,
    SimTime,
};
use motesim_frame::{decode_frame, encode_frame, FrameLayout};
use motesim_radio::driver::{AccumulatorState, FrameAccumulator};
use motesim_radio::{
    ByteRadio, ChipKind, ChipModel, EmulatedChip, MediumStats, PacketRadio, RadioMedium,
    StalledDelivery,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// CPU cycles a byte mote spends per work step.
pub const CYCLES_PER_STEP: u64 = 300;

/// CPU cycles a byte mote stays deaf after reading a frame.
pub const RX_PROCESSING_CYCLES: u64 = 2000;

// ============================================================================
// Counters
// ============================================================================

/// Per-mote counters shared with the caller.
#[derive(Debug, Default)]
pub struct MoteCounters {
    sent: AtomicU64,
    received: AtomicU64,
    invalid: AtomicU64,
}

impl MoteCounters {
    /// Frames sent.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Frames received intact.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Frames read from the chip that did not decode.
    pub fn invalid(&self) -> u64 {
        self.invalid.load(Ordering::Relaxed)
    }

    fn count_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn count_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn count_invalid(&self) {
        self.invalid.fetch_add(1, Ordering::Relaxed);
    }
}

fn payload(mote: MoteId, sequence: u64, len: usize) -> Vec<u8> {
    let seed = (mote.0 as u8) ^ (sequence as u8);
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

/// When a periodic sender next transmits.
#[derive(Debug, Clone, Copy)]
struct SendSchedule {
    period_ms: u64,
    next: SimTime,
}

impl SendSchedule {
    fn new(period_ms: Option<u64>, offset_ms: u64) -> Option<Self> {
        period_ms.map(|period_ms| SendSchedule {
            period_ms,
            next: SimTime::from_millis(offset_ms),
        })
    }

    fn delay(&mut self, ms: u64) {
        self.next += ms;
    }

    /// Whether a send is due at `now`. Missed periods are skipped.
    fn due(&mut self, now: SimTime) -> bool {
        if now < self.next {
            return false;
        }
        while self.next <= now {
            self.next += self.period_ms;
        }
        true
    }
}

// ============================================================================
// Beacon Mote
// ============================================================================

/// Coarse mote sending a beacon every period.
pub struct BeaconMote {
    id: MoteId,
    name: Option<String>,
    position: Position,
    radio: PacketRadio,
    schedule: Option<SendSchedule>,
    payload_len: usize,
    sequence: u64,
    counters: Arc<MoteCounters>,
}

impl BeaconMote {
    /// A beacon sending `payload_len` bytes every `period_ms`. `None` only
    /// listens.
    pub fn new(
        id: MoteId,
        position: Position,
        period_ms: Option<u64>,
        offset_ms: u64,
        payload_len: usize,
    ) -> Self {
        BeaconMote {
            id,
            name: None,
            position,
            radio: PacketRadio::cc2420(id),
            schedule: SendSchedule::new(period_ms, offset_ms),
            payload_len,
            sequence: 0,
            counters: Arc::default(),
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    /// Counters for this mote.
    pub fn counters(&self) -> Arc<MoteCounters> {
        Arc::clone(&self.counters)
    }
}

impl Mote for BeaconMote {
    fn id(&self) -> MoteId {
        self.id
    }

    fn kind(&self) -> MoteKind {
        MoteKind::Coarse
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn position(&self) -> Position {
        self.position
    }

    fn tick(&mut self, ctx: &mut SimContext) -> Result<bool, MoteError> {
        while let Some(packet) = self.radio.take_received() {
            trace!("{} heard {}", self.id, packet);
            self.counters.count_received();
        }

        let Some(schedule) = self.schedule.as_mut() else {
            return Ok(false);
        };
        if !schedule.due(ctx.now()) {
            return Ok(false);
        }
        if self.radio.is_transmitting() {
            debug!("{} skipped a beacon: still on air", self.id);
            return Ok(false);
        }
        let data = payload(self.id, self.sequence, self.payload_len);
        self.radio.transmit(data, ctx)?;
        self.sequence += 1;
        self.counters.count_sent();
        Ok(false)
    }

    fn radio(&self) -> Option<&dyn Radio> {
        Some(&self.radio)
    }

    fn radio_mut(&mut self) -> Option<&mut dyn Radio> {
        Some(&mut self.radio)
    }

    fn set_clock_drift(&mut self, drift_ms: i64) {
        if let Some(schedule) = self.schedule.as_mut() {
            schedule.delay(drift_ms.unsigned_abs());
        }
    }
}

// ============================================================================
// Byte Mote
// ============================================================================

/// Fine mote driving an emulated chip byte by byte.
pub struct ByteMote {
    id: MoteId,
    name: Option<String>,
    position: Position,
    radio: ByteRadio<EmulatedChip>,
    layout: FrameLayout,
    rate: CyclesPerMs,
    cycles: CpuCycles,
    budget_end: CpuCycles,
    boot_at: SimTime,
    booted: bool,
    schedule: Option<SendSchedule>,
    payload_len: usize,
    sequence: u64,
    tx_bytes: VecDeque<u8>,
    rx: FrameAccumulator,
    deaf_until: Option<CpuCycles>,
    counters: Arc<MoteCounters>,
}

impl ByteMote {
    /// A byte mote on `model`'s chip.
    pub fn new(
        id: MoteId,
        position: Position,
        model: ChipModel,
        period_ms: Option<u64>,
        offset_ms: u64,
        payload_len: usize,
    ) -> Self {
        let mut chip = match model.kind {
            ChipKind::Cc2420 => EmulatedChip::fifo(),
            ChipKind::Tr1001 => EmulatedChip::register(),
        };
        chip.set_listening(false);
        ByteMote {
            id,
            name: None,
            position,
            layout: model.layout,
            radio: ByteRadio::new(id, model, chip),
            rate: CyclesPerMs::MSP430,
            cycles: CpuCycles::ZERO,
            budget_end: CpuCycles::ZERO,
            boot_at: SimTime::ZERO,
            booted: false,
            schedule: SendSchedule::new(period_ms, offset_ms),
            payload_len,
            sequence: 0,
            tx_bytes: VecDeque::new(),
            rx: FrameAccumulator::new(model.layout),
            deaf_until: None,
            counters: Arc::default(),
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    /// Counters for this mote.
    pub fn counters(&self) -> Arc<MoteCounters> {
        Arc::clone(&self.counters)
    }

    /// The byte driver.
    pub fn driver(&self) -> &ByteRadio<EmulatedChip> {
        &self.radio
    }

    /// CPU cycle counter.
    pub fn cycles(&self) -> CpuCycles {
        self.cycles
    }

    fn set_listening(&mut self, listening: bool, ctx: &mut SimContext) {
        if self.radio.port().is_listening() == listening {
            return;
        }
        self.radio.port_mut().set_listening(listening);
        if listening {
            self.radio.on_chip_state_changed(ctx);
        }
    }

    fn receive(&mut self, ctx: &mut SimContext) {
        self.radio.pump(self.cycles);
        while let Some(byte) = self.radio.port_mut().read_byte() {
            if self.rx.push(byte) != AccumulatorState::Complete {
                continue;
            }
            let frame = self.rx.take_frame();
            match decode_frame(&self.layout, &frame) {
                Ok(data) => {
                    trace!("{} read a {}-byte frame", self.id, data.len());
                    self.counters.count_received();
                }
                Err(e) => {
                    debug!("{} read a bad frame: {}", self.id, e);
                    self.counters.count_invalid();
                }
            }
            self.deaf_until = Some(self.cycles + RX_PROCESSING_CYCLES);
            self.set_listening(false, ctx);
        }

        // Interference can cut a paced frame short.
        if !self.rx.is_empty() && self.radio.queued_bytes() == 0 {
            debug!("{} discarded {} bytes of a partial frame", self.id, self.rx.len());
            self.rx.reset();
        }

        if self.deaf_until.is_some_and(|until| self.cycles >= until) {
            self.deaf_until = None;
            if self.tx_bytes.is_empty() {
                self.set_listening(true, ctx);
            }
        }
    }

    fn transmit(&mut self, ctx: &mut SimContext) -> Result<(), MoteError> {
        if self.tx_bytes.is_empty() {
            let due = self
                .schedule
                .as_mut()
                .is_some_and(|schedule| schedule.due(ctx.now()));
            if !due {
                return Ok(());
            }
            let data = payload(self.id, self.sequence, self.payload_len);
            let frame =
                encode_frame(&self.layout, &data).map_err(motesim_common::RadioError::from)?;
            self.sequence += 1;
            self.tx_bytes.extend(frame);
            self.set_listening(false, ctx);
        }

        if let Some(byte) = self.tx_bytes.pop_front() {
            self.radio.on_byte_transmitted(byte, self.cycles, ctx);
            if self.tx_bytes.is_empty() {
                self.counters.count_sent();
                if self.deaf_until.is_none() {
                    self.set_listening(true, ctx);
                }
            }
        }
        Ok(())
    }
}

impl Mote for ByteMote {
    fn id(&self) -> MoteId {
        self.id
    }

    fn kind(&self) -> MoteKind {
        MoteKind::Fine
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn position(&self) -> Position {
        self.position
    }

    fn tick(&mut self, ctx: &mut SimContext) -> Result<bool, MoteError> {
        let now = ctx.now();
        if now < self.boot_at {
            return Ok(false);
        }
        if !self.booted {
            self.booted = true;
            debug!("{} booted at {}", self.id, now);
            self.set_listening(true, ctx);
        }

        let start = CpuCycles::at(now, self.rate);
        if self.cycles < start {
            self.cycles = start;
        }
        self.budget_end = CpuCycles::at(now.next_tick(), self.rate);
        if self.cycles >= self.budget_end {
            return Ok(false);
        }

        self.cycles += CYCLES_PER_STEP;
        self.receive(ctx);
        self.transmit(ctx)?;
        Ok(self.cycles < self.budget_end)
    }

    fn radio(&self) -> Option<&dyn Radio> {
        Some(&self.radio)
    }

    fn radio_mut(&mut self) -> Option<&mut dyn Radio> {
        Some(&mut self.radio)
    }

    fn set_clock_drift(&mut self, drift_ms: i64) {
        let delay = drift_ms.unsigned_abs();
        self.boot_at = SimTime::from_millis(delay);
        if let Some(schedule) = self.schedule.as_mut() {
            schedule.delay(delay);
        }
    }
}

// ============================================================================
// Assembly
// ============================================================================

/// Caller-side handle to a scenario mote.
#[derive(Debug, Clone)]
pub struct MoteHandle {
    /// Mote ID.
    pub id: MoteId,
    /// Display name.
    pub name: Option<String>,
    /// Scheduling class.
    pub kind: MoteKind,
    /// Live counters.
    pub counters: Arc<MoteCounters>,
}

impl MoteHandle {
    /// Current counter values.
    pub fn report(&self) -> MoteReport {
        MoteReport {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            sent: self.counters.sent(),
            received: self.counters.received(),
            invalid: self.counters.invalid(),
        }
    }
}

/// Counter values of one mote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoteReport {
    /// Mote ID.
    pub id: MoteId,
    /// Display name.
    pub name: Option<String>,
    /// Scheduling class.
    pub kind: MoteKind,
    /// Frames sent.
    pub sent: u64,
    /// Frames received.
    pub received: u64,
    /// Undecodable frames read.
    pub invalid: u64,
}

/// Build a mote from its scenario entry.
pub fn build_mote(config: &MoteConfig) -> (Box<dyn Mote>, MoteHandle) {
    let id = config.mote_id();
    let (mote, counters, kind) = match &config.behavior {
        MoteBehavior::Beacon {
            period_ms,
            offset_ms,
            payload_len,
        } => {
            let mote = BeaconMote::new(
                id,
                config.position,
                Some(*period_ms),
                *offset_ms,
                *payload_len,
            )
            .with_name(config.name.clone());
            let counters = mote.counters();
            (Box::new(mote) as Box<dyn Mote>, counters, MoteKind::Coarse)
        }
        MoteBehavior::Listener => {
            let mote =
                BeaconMote::new(id, config.position, None, 0, 1).with_name(config.name.clone());
            let counters = mote.counters();
            (Box::new(mote) as Box<dyn Mote>, counters, MoteKind::Coarse)
        }
        MoteBehavior::ByteMote {
            chip,
            period_ms,
            offset_ms,
            payload_len,
            stalled,
            channel,
        } => {
            let model = chip_model(*chip, *stalled, *channel);
            let mote = ByteMote::new(
                id,
                config.position,
                model,
                *period_ms,
                *offset_ms,
                *payload_len,
            )
            .with_name(config.name.clone());
            let counters = mote.counters();
            (Box::new(mote) as Box<dyn Mote>, counters, MoteKind::Fine)
        }
    };
    let handle = MoteHandle {
        id,
        name: config.name.clone(),
        kind,
        counters,
    };
    (mote, handle)
}

fn chip_model(kind: ChipKind, stalled: StalledDelivery, channel: Option<u8>) -> ChipModel {
    let model = ChipModel::for_kind(kind).with_stalled(stalled);
    match channel {
        Some(channel) => model.with_channel(channel),
        None => model,
    }
}

/// Build a simulation for a scenario.
pub fn build(config: &ScenarioConfig) -> Result<(Simulation, Vec<MoteHandle>), RunnerError> {
    config.validate()?;
    let medium = RadioMedium::from_config(&config.medium)?;
    let mut sim = Simulation::new(config.simulation.clone(), medium);
    let mut handles = Vec::with_capacity(config.motes.len());
    for mote_config in &config.motes {
        let (mote, handle) = build_mote(mote_config);
        sim.add_mote(mote)?;
        handles.push(handle);
    }
    Ok((sim, handles))
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Simulation time at stop.
    pub end_time_ms: u64,
    /// Why the run stopped.
    pub stop_reason: String,
    /// Engine counters.
    pub simulation: SimulationStats,
    /// Medium counters.
    pub medium: MediumStats,
    /// Per-mote counters.
    pub motes: Vec<MoteReport>,
}

impl RunReport {
    /// Collect a report from a stopped simulation.
    pub fn collect(sim: &Simulation, reason: &StopReason, handles: &[MoteHandle]) -> Self {
        RunReport {
            end_time_ms: sim.now().as_millis(),
            stop_reason: reason.to_string(),
            simulation: sim.stats().clone(),
            medium: sim.medium().stats().clone(),
            motes: handles.iter().map(MoteHandle::report).collect(),
        }
    }
}
