//! Radio interface shared by every mote radio.
//!
//! Each radio owns a [`RadioInterface`] with the state the medium and
//! subscribers look at: the radio state, the last event, the last packets and
//! the channel/power/RSSI readings. The [`Radio`] trait exposes it and adds the
//! hooks the medium drives.

use crate::{MoteError, MoteId, RadioError, SimContext, SimTime, TimerKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Signal strength reported while a reception is in progress (dBm).
pub const SIGNAL_STRENGTH_STRONG: f64 = -10.0;
/// Signal strength reported when the channel is quiet (dBm).
pub const SIGNAL_STRENGTH_NOTHING: f64 = -100.0;

// ============================================================================
// State and notifications
// ============================================================================

/// State of a radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RadioState {
    /// Neither sending nor receiving.
    #[default]
    Idle,
    /// Sending a frame.
    Transmitting,
    /// Receiving a frame from a single sender.
    Receiving,
    /// Receiving overlapping frames; nothing will be delivered.
    Interfered,
}

/// Kinds of radio events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RadioEventKind {
    /// First byte or packet start went on the air.
    TransmissionStarted,
    /// A raw byte was transmitted.
    CustomDataTransmitted,
    /// A complete packet was transmitted.
    PacketTransmitted,
    /// The transmission ended, with or without a packet.
    TransmissionFinished,
    /// A reception began.
    ReceptionStarted,
    /// A reception ended.
    ReceptionFinished,
    /// A reception was corrupted by a collision.
    ReceptionInterfered,
    /// Any other change.
    Unknown,
}

/// Typed notification emitted on every radio event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioNotification {
    /// Mote owning the radio.
    pub mote: MoteId,
    /// What happened.
    pub kind: RadioEventKind,
    /// When it happened.
    pub time: SimTime,
    /// The sent packet, set on [`RadioEventKind::PacketTransmitted`] only.
    pub packet: Option<RadioPacket>,
}

impl RadioNotification {
    /// A notification without a packet.
    pub fn new(mote: MoteId, kind: RadioEventKind, time: SimTime) -> Self {
        RadioNotification {
            mote,
            kind,
            time,
            packet: None,
        }
    }
}

// ============================================================================
// Packets
// ============================================================================

/// A logical packet exchanged through the medium.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RadioPacket {
    /// Payload bytes, without hardware framing.
    pub data: Vec<u8>,
    /// CPU cycles between consecutive frame bytes as they were sent, if known.
    pub byte_delays: Option<Vec<u64>>,
}

impl RadioPacket {
    /// Create a packet from payload bytes.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        RadioPacket {
            data: data.into(),
            byte_delays: None,
        }
    }

    /// Attach recorded per-byte delays.
    pub fn with_byte_delays(mut self, delays: Vec<u64>) -> Self {
        self.byte_delays = Some(delays);
        self
    }

    /// Payload length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Display for RadioPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes [", self.data.len())?;
        for (i, b) in self.data.iter().take(16).enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", b)?;
        }
        if self.data.len() > 16 {
            write!(f, " ..")?;
        }
        write!(f, "]")
    }
}

// ============================================================================
// Radio interface
// ============================================================================

/// Common state of every radio.
#[derive(Debug, Clone)]
pub struct RadioInterface {
    mote: MoteId,
    state: RadioState,
    last_event: Option<(RadioEventKind, SimTime)>,
    last_transmitted: Option<RadioPacket>,
    last_received: Option<RadioPacket>,
    channel: u8,
    output_power_indicator: u8,
    output_power_max: u8,
    signal_strength_dbm: f64,
}

impl RadioInterface {
    /// Create an idle interface on `channel`, at full output power.
    pub fn new(mote: MoteId, channel: u8, output_power_max: u8) -> Self {
        RadioInterface {
            mote,
            state: RadioState::Idle,
            last_event: None,
            last_transmitted: None,
            last_received: None,
            channel,
            output_power_indicator: output_power_max,
            output_power_max,
            signal_strength_dbm: SIGNAL_STRENGTH_NOTHING,
        }
    }

    /// Owning mote.
    pub fn mote(&self) -> MoteId {
        self.mote
    }

    /// Current state.
    pub fn state(&self) -> RadioState {
        self.state
    }

    /// Force a state without emitting anything.
    pub fn set_state(&mut self, state: RadioState) {
        self.state = state;
    }

    /// Last event and when it happened.
    pub fn last_event(&self) -> Option<(RadioEventKind, SimTime)> {
        self.last_event
    }

    /// Last packet sent.
    pub fn last_transmitted(&self) -> Option<&RadioPacket> {
        self.last_transmitted.as_ref()
    }

    /// Last packet received.
    pub fn last_received(&self) -> Option<&RadioPacket> {
        self.last_received.as_ref()
    }

    /// Radio channel.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Set the radio channel.
    pub fn set_channel(&mut self, channel: u8) {
        self.channel = channel;
    }

    /// Output power indicator.
    pub fn output_power_indicator(&self) -> u8 {
        self.output_power_indicator
    }

    /// Largest output power indicator.
    pub fn output_power_max(&self) -> u8 {
        self.output_power_max
    }

    /// Set the output power indicator, clamped to the maximum.
    pub fn set_output_power_indicator(&mut self, value: u8) {
        self.output_power_indicator = value.min(self.output_power_max);
    }

    /// Current RSSI in dBm.
    pub fn signal_strength(&self) -> f64 {
        self.signal_strength_dbm
    }

    /// Set the RSSI in dBm.
    pub fn set_signal_strength(&mut self, dbm: f64) {
        self.signal_strength_dbm = dbm;
    }

    /// Record an event and publish its notification.
    pub fn emit(&mut self, kind: RadioEventKind, ctx: &mut SimContext) {
        let time = ctx.now();
        self.last_event = Some((kind, time));
        ctx.notify(RadioNotification::new(self.mote, kind, time));
    }

    /// Record a sent packet and publish it with
    /// [`RadioEventKind::PacketTransmitted`].
    pub fn emit_transmitted(&mut self, packet: RadioPacket, ctx: &mut SimContext) {
        let time = ctx.now();
        let kind = RadioEventKind::PacketTransmitted;
        self.last_event = Some((kind, time));
        self.last_transmitted = Some(packet.clone());
        ctx.notify(RadioNotification {
            packet: Some(packet),
            ..RadioNotification::new(self.mote, kind, time)
        });
    }

    /// Record a received packet.
    pub fn record_received(&mut self, packet: RadioPacket) {
        self.last_received = Some(packet);
    }

    /// Enter the receiving state.
    pub fn begin_reception(&mut self, ctx: &mut SimContext) {
        self.state = RadioState::Receiving;
        self.signal_strength_dbm = SIGNAL_STRENGTH_STRONG;
        self.emit(RadioEventKind::ReceptionStarted, ctx);
    }

    /// Mark the current reception as corrupted.
    ///
    /// Emits [`RadioEventKind::ReceptionInterfered`] only on the transition.
    pub fn interfere(&mut self, ctx: &mut SimContext) {
        if self.state == RadioState::Interfered {
            return;
        }
        self.state = RadioState::Interfered;
        self.emit(RadioEventKind::ReceptionInterfered, ctx);
    }

    /// Leave the receiving or interfered state.
    pub fn end_reception(&mut self, ctx: &mut SimContext) {
        if !matches!(self.state, RadioState::Receiving | RadioState::Interfered) {
            return;
        }
        self.state = RadioState::Idle;
        self.signal_strength_dbm = SIGNAL_STRENGTH_NOTHING;
        self.emit(RadioEventKind::ReceptionFinished, ctx);
    }
}

// ============================================================================
// Radio trait
// ============================================================================

/// A mote radio driven by the medium.
pub trait Radio: Send {
    /// Common radio state.
    fn interface(&self) -> &RadioInterface;

    /// Mutable common radio state.
    fn interface_mut(&mut self) -> &mut RadioInterface;

    /// Accept a packet delivered by the medium.
    fn set_received_packet(
        &mut self,
        packet: RadioPacket,
        ctx: &mut SimContext,
    ) -> Result<(), RadioError>;

    /// Handle a timer the radio armed.
    fn on_timer(&mut self, _timer: TimerKind, _ctx: &mut SimContext) -> Result<(), MoteError> {
        Ok(())
    }

    /// A sender in range started transmitting.
    fn signal_reception_start(&mut self, ctx: &mut SimContext) {
        self.interface_mut().begin_reception(ctx);
    }

    /// The reception ended.
    fn signal_reception_end(&mut self, ctx: &mut SimContext) {
        self.interface_mut().end_reception(ctx);
    }

    /// A second sender collided with the ongoing reception.
    fn interfere_any_reception(&mut self, ctx: &mut SimContext) {
        self.interface_mut().interfere(ctx);
    }

    /// Owning mote.
    fn mote(&self) -> MoteId {
        self.interface().mote()
    }

    /// Current state.
    fn state(&self) -> RadioState {
        self.interface().state()
    }

    /// Whether a frame is going out.
    fn is_transmitting(&self) -> bool {
        self.state() == RadioState::Transmitting
    }

    /// Whether a clean reception is in progress.
    fn is_receiving(&self) -> bool {
        self.state() == RadioState::Receiving
    }

    /// Whether the current reception is corrupted.
    fn is_interfered(&self) -> bool {
        self.state() == RadioState::Interfered
    }

    /// Radio channel.
    fn channel(&self) -> u8 {
        self.interface().channel()
    }
}

/// Lookup of radios by mote, implemented by the simulation's mote set.
pub trait RadioDirectory {
    /// Radio of `mote`, if it exists and has one.
    fn radio_mut(&mut self, mote: MoteId) -> Option<&mut dyn Radio>;
}
