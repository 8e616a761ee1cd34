//! Packet-granular radio for coarse motes.
//!
//! A [`PacketRadio`] hands whole packets to the medium. The time on air is
//! derived from the hardware frame length at the configured bit rate, rounded
//! up to whole milliseconds.

use motesim_common::{
    MoteError, MoteId, Radio, RadioError, RadioEventKind, RadioInterface, RadioPacket,
    RadioState, SimContext, SimTime, TimerKind,
};
use motesim_frame::FrameLayout;
use std::collections::VecDeque;
use tracing::debug;

/// CC2420 on-air bit rate.
pub const CC2420_BIT_RATE_BPS: u64 = 250_000;

/// Radio that transmits and receives whole packets.
pub struct PacketRadio {
    iface: RadioInterface,
    layout: FrameLayout,
    bit_rate_bps: u64,
    outgoing: Option<RadioPacket>,
    inbox: VecDeque<RadioPacket>,
}

impl PacketRadio {
    /// Create a radio framing packets with `layout` at `bit_rate_bps`.
    pub fn new(mote: MoteId, layout: FrameLayout, bit_rate_bps: u64, channel: u8) -> Self {
        PacketRadio {
            iface: RadioInterface::new(mote, channel, 31),
            layout,
            bit_rate_bps: bit_rate_bps.max(1),
            outgoing: None,
            inbox: VecDeque::new(),
        }
    }

    /// A CC2420-like radio on channel 26.
    pub fn cc2420(mote: MoteId) -> Self {
        Self::new(mote, FrameLayout::cc2420(), CC2420_BIT_RATE_BPS, 26)
    }

    /// Milliseconds on air for a payload of `payload_len` bytes.
    pub fn airtime_ms(&self, payload_len: usize) -> u64 {
        let bits = self.layout.frame_len(payload_len) as u64 * 8;
        (bits * 1000).div_ceil(self.bit_rate_bps).max(1)
    }

    /// Start transmitting `payload`. Returns when the transmission ends.
    pub fn transmit(
        &mut self,
        payload: impl Into<Vec<u8>>,
        ctx: &mut SimContext,
    ) -> Result<SimTime, RadioError> {
        if self.iface.state() == RadioState::Transmitting {
            return Err(RadioError::Busy);
        }
        let payload = payload.into();
        let max = self.layout.effective_max_payload();
        if payload.len() > max {
            return Err(motesim_frame::FrameError::TooLarge {
                size: payload.len(),
                max,
            }
            .into());
        }

        let end = ctx.now() + self.airtime_ms(payload.len());
        debug!("{} sending {} bytes until {}", self.iface.mote(), payload.len(), end);
        self.iface.set_state(RadioState::Transmitting);
        self.iface.emit(RadioEventKind::TransmissionStarted, ctx);
        self.outgoing = Some(RadioPacket::new(payload));
        ctx.schedule_timer(self.iface.mote(), TimerKind::TransmissionEnd, end);
        Ok(end)
    }

    /// Take the oldest received packet.
    pub fn take_received(&mut self) -> Option<RadioPacket> {
        self.inbox.pop_front()
    }

    /// Number of packets waiting to be taken.
    pub fn pending_received(&self) -> usize {
        self.inbox.len()
    }

    fn finish_transmission(&mut self, ctx: &mut SimContext) {
        let Some(packet) = self.outgoing.take() else {
            return;
        };
        self.iface.emit_transmitted(packet, ctx);
        self.iface.set_state(RadioState::Idle);
        self.iface.emit(RadioEventKind::TransmissionFinished, ctx);
    }
}

impl Radio for PacketRadio {
    fn interface(&self) -> &RadioInterface {
        &self.iface
    }

    fn interface_mut(&mut self) -> &mut RadioInterface {
        &mut self.iface
    }

    fn set_received_packet(
        &mut self,
        packet: RadioPacket,
        _ctx: &mut SimContext,
    ) -> Result<(), RadioError> {
        if packet.is_empty() {
            return Err(RadioError::EmptyPacket);
        }
        if self.iface.state() == RadioState::Interfered {
            return Err(RadioError::Interfered);
        }
        self.iface.record_received(packet.clone());
        self.inbox.push_back(packet);
        Ok(())
    }

    fn on_timer(&mut self, timer: TimerKind, ctx: &mut SimContext) -> Result<(), MoteError> {
        if timer == TimerKind::TransmissionEnd {
            self.finish_transmission(ctx);
        }
        Ok(())
    }
}
