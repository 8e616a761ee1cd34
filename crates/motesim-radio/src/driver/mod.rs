//! Byte-level radio driver.
//!
//! A [`ByteRadio`] sits between an emulated radio chip that reads and writes
//! single bytes and the packet-level medium.
//!
//! Outbound, every byte the chip writes goes into a [`FrameAccumulator`]
//! together with the CPU cycles elapsed since the previous byte. Once the
//! length byte's size is reached, the frame is decoded and reported as a
//! packet. A transmission that goes quiet for longer than the chip's
//! inactivity window is abandoned.
//!
//! Inbound, packets from the medium are encoded to the chip's frame layout
//! and fed according to the model's [`FeedMode`]:
//!
//! - `Immediate` chips get the whole frame at once if they are listening.
//!   Otherwise the frame waits in a [`PendingDelivery`] token until the chip
//!   reports it is ready, gets replaced by a newer frame, or expires.
//! - `Paced` chips get one byte at a time from [`ByteRadio::pump`], replaying
//!   the sender's recorded byte delays.

mod accumulator;
mod chip;
mod port;

pub use accumulator::*;
pub use chip::*;
pub use port::*;

use crate::mote_label;
use motesim_common::{
    CpuCycles, MoteError, MoteId, Radio, RadioError, RadioEventKind, RadioInterface, RadioPacket,
    RadioState, SimContext, SimTime, TimerKind,
};
use motesim_frame::{decode_frame, encode_frame};
use motesim_metrics::metric_defs;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, trace, warn};

/// An inbound frame waiting for the chip to become ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelivery {
    /// Identifies this delivery in timers.
    pub token: u64,
    /// Encoded frame.
    pub bytes: Vec<u8>,
    /// When the frame arrived.
    pub registered_at: SimTime,
    delivery_scheduled: bool,
}

impl PendingDelivery {
    /// Whether a delivery timer is armed for this token.
    pub fn is_delivery_scheduled(&self) -> bool {
        self.delivery_scheduled
    }
}

/// Per-driver counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriverStats {
    /// Outbound transmissions started.
    pub transmissions_started: u64,
    /// Outbound packets assembled and reported.
    pub packets_sent: u64,
    /// Outbound frames that did not decode.
    pub invalid_frames: u64,
    /// Outbound transmissions abandoned after going quiet.
    pub transmissions_abandoned: u64,
    /// Inbound packets accepted from the medium.
    pub packets_received: u64,
    /// Inbound frames that had to wait for the chip.
    pub deliveries_buffered: u64,
    /// Inbound frames dropped before reaching the chip.
    pub deliveries_dropped: u64,
    /// Inbound bytes handed to the chip.
    pub bytes_delivered: u64,
    /// Inbound bytes the chip refused.
    pub bytes_dropped: u64,
}

/// Byte-level radio driver for one chip.
pub struct ByteRadio<P> {
    iface: RadioInterface,
    model: ChipModel,
    port: P,

    tx: FrameAccumulator,
    tx_delays: Vec<u64>,
    last_tx_cycles: Option<CpuCycles>,
    last_tx_time: SimTime,
    inactivity_armed: bool,

    pending: Option<PendingDelivery>,
    next_token: u64,
    rx_queue: VecDeque<(u8, u64)>,
    last_rx_cycles: Option<CpuCycles>,

    stats: DriverStats,
}

impl<P: ChipPort> ByteRadio<P> {
    /// Create a driver for `port` behaving like `model`.
    pub fn new(mote: MoteId, model: ChipModel, port: P) -> Self {
        ByteRadio {
            iface: RadioInterface::new(mote, model.channel, model.output_power_max),
            model,
            port,
            tx: FrameAccumulator::new(model.layout),
            tx_delays: Vec::new(),
            last_tx_cycles: None,
            last_tx_time: SimTime::ZERO,
            inactivity_armed: false,
            pending: None,
            next_token: 0,
            rx_queue: VecDeque::new(),
            last_rx_cycles: None,
            stats: DriverStats::default(),
        }
    }

    /// The chip model.
    pub fn model(&self) -> &ChipModel {
        &self.model
    }

    /// The chip.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// The chip.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Counters.
    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    /// The frame waiting for the chip, if any.
    pub fn pending_delivery(&self) -> Option<&PendingDelivery> {
        self.pending.as_ref()
    }

    /// Inbound bytes still queued for paced delivery.
    pub fn queued_bytes(&self) -> usize {
        self.rx_queue.len()
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// The chip wrote `byte` when the CPU counter read `cycles`.
    pub fn on_byte_transmitted(&mut self, byte: u8, cycles: CpuCycles, ctx: &mut SimContext) {
        let mote = self.iface.mote();
        if self.iface.state() != RadioState::Transmitting {
            self.tx.reset();
            self.tx_delays.clear();
            self.last_tx_cycles = None;
            self.iface.set_state(RadioState::Transmitting);
            self.iface.emit(RadioEventKind::TransmissionStarted, ctx);
            self.stats.transmissions_started += 1;
        }

        let delay = self
            .last_tx_cycles
            .map_or(0, |last| cycles.saturating_since(last));
        self.last_tx_cycles = Some(cycles);
        self.tx_delays.push(delay);
        self.last_tx_time = ctx.now();
        self.iface.emit(RadioEventKind::CustomDataTransmitted, ctx);
        trace!("{} tx byte {:02x} after {} cycles", mote, byte, delay);

        if !self.inactivity_armed {
            let at = self.last_tx_time + self.model.inactivity_ticks + 1;
            ctx.schedule_timer(mote, TimerKind::TransmitInactivity, at);
            self.inactivity_armed = true;
        }

        if self.tx.push(byte) == AccumulatorState::Complete {
            self.complete_transmission(ctx);
        }
    }

    fn complete_transmission(&mut self, ctx: &mut SimContext) {
        let mote = self.iface.mote();
        let frame = self.tx.take_frame();
        let delays = std::mem::take(&mut self.tx_delays);
        self.last_tx_cycles = None;

        match decode_frame(&self.model.layout, &frame) {
            Ok(payload) => {
                debug!("{} sent frame {}", mote, hex::encode(&frame));
                self.stats.packets_sent += 1;
                self.iface
                    .emit_transmitted(RadioPacket::new(payload).with_byte_delays(delays), ctx);
            }
            Err(e) => {
                warn!("{} sent an undecodable frame {}: {}", mote, hex::encode(&frame), e);
                self.stats.invalid_frames += 1;
            }
        }

        self.iface.set_state(RadioState::Idle);
        self.iface.emit(RadioEventKind::TransmissionFinished, ctx);
    }

    fn check_inactivity(&mut self, ctx: &mut SimContext) {
        self.inactivity_armed = false;
        if self.iface.state() != RadioState::Transmitting {
            return;
        }

        let mote = self.iface.mote();
        let quiet = ctx.now().saturating_since(self.last_tx_time);
        if quiet <= self.model.inactivity_ticks {
            let at = self.last_tx_time + self.model.inactivity_ticks + 1;
            ctx.schedule_timer(mote, TimerKind::TransmitInactivity, at);
            self.inactivity_armed = true;
            return;
        }

        warn!(
            "{} abandoned transmission after {} quiet ticks ({} bytes buffered)",
            mote,
            quiet,
            self.tx.len()
        );
        self.tx.reset();
        self.tx_delays.clear();
        self.last_tx_cycles = None;
        self.stats.transmissions_abandoned += 1;
        metrics::counter!(metric_defs::DRIVER_TX_ABANDONED.name, &mote_label(mote)).increment(1);
        self.iface.set_state(RadioState::Idle);
        self.iface.emit(RadioEventKind::TransmissionFinished, ctx);
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// The chip's receive state changed.
    ///
    /// If a frame is waiting and the chip now listens, its delivery is
    /// scheduled for the next millisecond. Only one delivery is armed per
    /// token.
    pub fn on_chip_state_changed(&mut self, ctx: &mut SimContext) {
        let mote = self.iface.mote();
        if !self.port.accepts_bytes() {
            return;
        }
        if let Some(pending) = self.pending.as_mut() {
            if !pending.delivery_scheduled {
                pending.delivery_scheduled = true;
                ctx.schedule_in(mote, TimerKind::BufferedDelivery { token: pending.token }, 1);
            }
        }
    }

    /// Hand queued bytes to a paced chip as `cycles` passes their delays.
    ///
    /// Returns the number of bytes the chip accepted.
    pub fn pump(&mut self, cycles: CpuCycles) -> usize {
        let mote = self.iface.mote();
        let mut accepted = 0;
        while let Some(&(byte, delay)) = self.rx_queue.front() {
            let last = *self.last_rx_cycles.get_or_insert(cycles);
            if cycles.saturating_since(last) < delay {
                break;
            }
            self.rx_queue.pop_front();
            self.last_rx_cycles = Some(last + delay);

            if self.port.receive_byte(byte) {
                accepted += 1;
                self.stats.bytes_delivered += 1;
            } else {
                trace!("{} dropped rx byte {:02x}: receive flag still set", mote, byte);
                self.stats.bytes_dropped += 1;
                metrics::counter!(metric_defs::DRIVER_BYTES_DROPPED.name, &mote_label(mote))
                    .increment(1);
            }
        }
        if self.rx_queue.is_empty() {
            self.last_rx_cycles = None;
        }
        accepted
    }

    fn feed_now(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if self.port.receive_byte(byte) {
                self.stats.bytes_delivered += 1;
            } else {
                self.stats.bytes_dropped += 1;
            }
        }
    }

    fn buffer_frame(&mut self, bytes: Vec<u8>, ctx: &mut SimContext) {
        let mote = self.iface.mote();
        let token = self.next_token;
        self.next_token += 1;
        debug!("{} chip not ready; holding {}-byte frame", mote, bytes.len());

        self.pending = Some(PendingDelivery {
            token,
            bytes,
            registered_at: ctx.now(),
            delivery_scheduled: false,
        });
        self.stats.deliveries_buffered += 1;

        if let StalledDelivery::DropAfter { ticks } = self.model.stalled {
            ctx.schedule_in(mote, TimerKind::DeliveryExpiry { token }, ticks);
        }
    }

    fn drop_pending(&mut self, pending: PendingDelivery, reason: &str) {
        let mote = self.iface.mote();
        warn!(
            "{} dropped {}-byte frame held since {} ({})",
            mote,
            pending.bytes.len(),
            pending.registered_at,
            reason
        );
        self.stats.deliveries_dropped += 1;
        metrics::counter!(metric_defs::DRIVER_DELIVERIES_DROPPED.name, &mote_label(mote))
            .increment(1);
    }

    fn deliver_buffered(&mut self, token: u64) {
        let ready = self.port.accepts_bytes();
        let Some(pending) = self.pending.as_mut().filter(|p| p.token == token) else {
            return;
        };
        if !ready {
            pending.delivery_scheduled = false;
            return;
        }
        if let Some(pending) = self.pending.take() {
            debug!(
                "{} delivering frame held since {}",
                self.iface.mote(),
                pending.registered_at
            );
            self.feed_now(&pending.bytes);
        }
    }

    fn expire_pending(&mut self, token: u64) {
        if self.pending.as_ref().is_some_and(|p| p.token == token) {
            if let Some(pending) = self.pending.take() {
                self.drop_pending(pending, "expired");
            }
        }
    }

    fn byte_delays_for(&self, packet: &RadioPacket, frame_len: usize, default: u64) -> Vec<u64> {
        match &packet.byte_delays {
            Some(delays) if delays.len() == frame_len => delays.clone(),
            _ => (0..frame_len)
                .map(|i| if i == 0 { 0 } else { default })
                .collect(),
        }
    }
}

impl<P: ChipPort> Radio for ByteRadio<P> {
    fn interface(&self) -> &RadioInterface {
        &self.iface
    }

    fn interface_mut(&mut self) -> &mut RadioInterface {
        &mut self.iface
    }

    fn set_received_packet(
        &mut self,
        packet: RadioPacket,
        ctx: &mut SimContext,
    ) -> Result<(), RadioError> {
        if packet.is_empty() {
            return Err(RadioError::EmptyPacket);
        }
        if self.model.reject_while_interfered && self.iface.state() == RadioState::Interfered {
            return Err(RadioError::Interfered);
        }
        let frame = encode_frame(&self.model.layout, &packet.data)?;
        self.stats.packets_received += 1;

        match self.model.feed {
            FeedMode::Immediate => {
                if let Some(old) = self.pending.take() {
                    self.drop_pending(old, "replaced");
                }
                if self.port.accepts_bytes() {
                    self.feed_now(&frame);
                } else {
                    self.buffer_frame(frame, ctx);
                }
            }
            FeedMode::Paced {
                cycles_between_bytes,
            } => {
                let delays = self.byte_delays_for(&packet, frame.len(), cycles_between_bytes);
                if self.rx_queue.is_empty() {
                    self.last_rx_cycles = None;
                }
                self.rx_queue.extend(frame.into_iter().zip(delays));
            }
        }

        self.iface.record_received(packet);
        Ok(())
    }

    fn on_timer(&mut self, timer: TimerKind, ctx: &mut SimContext) -> Result<(), MoteError> {
        match timer {
            TimerKind::TransmitInactivity => self.check_inactivity(ctx),
            TimerKind::BufferedDelivery { token } => self.deliver_buffered(token),
            TimerKind::DeliveryExpiry { token } => self.expire_pending(token),
            TimerKind::TransmissionEnd | TimerKind::Firmware(_) => {}
        }
        Ok(())
    }

    fn interfere_any_reception(&mut self, ctx: &mut SimContext) {
        self.iface.interfere(ctx);
        if self.model.clear_on_interference && !self.rx_queue.is_empty() {
            debug!(
                "{} interference cleared {} queued bytes",
                self.iface.mote(),
                self.rx_queue.len()
            );
            self.rx_queue.clear();
            self.last_rx_cycles = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cc2420_radio() -> ByteRadio<EmulatedChip> {
        ByteRadio::new(MoteId::new(1), ChipModel::cc2420(), EmulatedChip::fifo())
    }

    fn send_frame(radio: &mut ByteRadio<EmulatedChip>, frame: &[u8], ctx: &mut SimContext) {
        for (i, &b) in frame.iter().enumerate() {
            radio.on_byte_transmitted(b, CpuCycles::new(i as u64 * 100), ctx);
        }
    }

    fn kinds(ctx: &mut SimContext) -> Vec<RadioEventKind> {
        ctx.take_notifications()
            .into_iter()
            .map(|n| n.kind)
            .filter(|k| *k != RadioEventKind::CustomDataTransmitted)
            .collect()
    }

    #[test]
    fn test_outbound_frame_becomes_packet() {
        let mut radio = cc2420_radio();
        let mut ctx = SimContext::new(SimTime::from_millis(3));
        let frame = encode_frame(&ChipModel::cc2420().layout, &[5, 6, 7]).unwrap();

        send_frame(&mut radio, &frame, &mut ctx);

        assert_eq!(
            kinds(&mut ctx),
            vec![
                RadioEventKind::TransmissionStarted,
                RadioEventKind::PacketTransmitted,
                RadioEventKind::TransmissionFinished,
            ]
        );
        let packet = radio.interface().last_transmitted().unwrap();
        assert_eq!(packet.data, vec![5, 6, 7]);
        let delays = packet.byte_delays.as_ref().unwrap();
        assert_eq!(delays.len(), frame.len());
        assert_eq!(delays[0], 0);
        assert!(delays[1..].iter().all(|d| *d == 100));
        assert_eq!(radio.state(), RadioState::Idle);
        assert_eq!(radio.stats().packets_sent, 1);
    }

    #[test]
    fn test_inactivity_abandons_transmission() {
        let mut radio = cc2420_radio();
        let mut ctx = SimContext::new(SimTime::from_millis(10));
        radio.on_byte_transmitted(0, CpuCycles::new(0), &mut ctx);
        radio.on_byte_transmitted(0, CpuCycles::new(10), &mut ctx);

        let timers = ctx.take_timers();
        assert_eq!(timers.len(), 1, "one inactivity check is armed at a time");
        assert_eq!(timers[0].at, SimTime::from_millis(15));
        ctx.take_notifications();

        let mut ctx = SimContext::new(SimTime::from_millis(15));
        radio.on_timer(TimerKind::TransmitInactivity, &mut ctx).unwrap();
        assert_eq!(kinds(&mut ctx), vec![RadioEventKind::TransmissionFinished]);
        assert_eq!(radio.state(), RadioState::Idle);
        assert_eq!(radio.stats().transmissions_abandoned, 1);
        assert!(radio.interface().last_transmitted().is_none());
    }

    #[test]
    fn test_inactivity_rearms_while_bytes_flow() {
        let mut radio = cc2420_radio();
        let mut ctx = SimContext::new(SimTime::from_millis(10));
        radio.on_byte_transmitted(0, CpuCycles::new(0), &mut ctx);
        ctx.take_timers();

        let mut ctx = SimContext::new(SimTime::from_millis(13));
        radio.on_byte_transmitted(0, CpuCycles::new(10), &mut ctx);
        assert!(ctx.timers().is_empty());

        let mut ctx = SimContext::new(SimTime::from_millis(15));
        radio.on_timer(TimerKind::TransmitInactivity, &mut ctx).unwrap();
        assert!(radio.is_transmitting());
        let timers = ctx.take_timers();
        assert_eq!(timers[0].at, SimTime::from_millis(18));
    }

    #[test]
    fn test_immediate_feed_when_listening() {
        let mut radio = cc2420_radio();
        let mut ctx = SimContext::new(SimTime::ZERO);
        radio
            .set_received_packet(RadioPacket::new(vec![1, 2]), &mut ctx)
            .unwrap();
        let expected = encode_frame(&ChipModel::cc2420().layout, &[1, 2]).unwrap();
        assert_eq!(radio.port_mut().drain(), expected);
        assert!(radio.pending_delivery().is_none());
    }

    #[test]
    fn test_buffered_delivery_waits_for_chip() {
        let mut radio = cc2420_radio();
        radio.port_mut().set_listening(false);
        let mut ctx = SimContext::new(SimTime::from_millis(7));
        radio
            .set_received_packet(RadioPacket::new(vec![9]), &mut ctx)
            .unwrap();

        let pending = radio.pending_delivery().unwrap().clone();
        assert_eq!(pending.registered_at, SimTime::from_millis(7));
        assert!(!radio.port().rx_flag());

        // Not ready yet: nothing armed.
        radio.on_chip_state_changed(&mut ctx);
        assert!(ctx.timers().is_empty());

        radio.port_mut().set_listening(true);
        radio.on_chip_state_changed(&mut ctx);
        radio.on_chip_state_changed(&mut ctx);
        let timers = ctx.take_timers();
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0].at, SimTime::from_millis(8));

        let mut ctx = SimContext::new(SimTime::from_millis(8));
        radio.on_timer(timers[0].timer, &mut ctx).unwrap();
        assert!(radio.pending_delivery().is_none());
        assert_eq!(radio.port_mut().drain(), pending.bytes);
    }

    #[test]
    fn test_newer_frame_replaces_pending() {
        let mut radio = cc2420_radio();
        radio.port_mut().set_listening(false);
        let mut ctx = SimContext::new(SimTime::ZERO);
        radio.set_received_packet(RadioPacket::new(vec![1]), &mut ctx).unwrap();
        radio.set_received_packet(RadioPacket::new(vec![2]), &mut ctx).unwrap();

        assert_eq!(radio.stats().deliveries_dropped, 1);
        assert_eq!(radio.pending_delivery().unwrap().token, 1);
    }

    #[test]
    fn test_drop_after_expires_pending() {
        let model = ChipModel::cc2420().with_stalled(StalledDelivery::DropAfter { ticks: 5 });
        let mut radio = ByteRadio::new(MoteId::new(1), model, EmulatedChip::fifo());
        radio.port_mut().set_listening(false);
        let mut ctx = SimContext::new(SimTime::from_millis(2));
        radio.set_received_packet(RadioPacket::new(vec![1]), &mut ctx).unwrap();

        let timers = ctx.take_timers();
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0].timer, TimerKind::DeliveryExpiry { token: 0 });
        assert_eq!(timers[0].at, SimTime::from_millis(7));

        let mut ctx = SimContext::new(SimTime::from_millis(7));
        radio.on_timer(timers[0].timer, &mut ctx).unwrap();
        assert!(radio.pending_delivery().is_none());
        assert_eq!(radio.stats().deliveries_dropped, 1);
    }

    #[test]
    fn test_stale_expiry_is_ignored() {
        let model = ChipModel::cc2420().with_stalled(StalledDelivery::DropAfter { ticks: 5 });
        let mut radio = ByteRadio::new(MoteId::new(1), model, EmulatedChip::fifo());
        radio.port_mut().set_listening(false);
        let mut ctx = SimContext::new(SimTime::ZERO);
        radio.set_received_packet(RadioPacket::new(vec![1]), &mut ctx).unwrap();
        radio.set_received_packet(RadioPacket::new(vec![2]), &mut ctx).unwrap();

        radio
            .on_timer(TimerKind::DeliveryExpiry { token: 0 }, &mut ctx)
            .unwrap();
        assert_eq!(radio.pending_delivery().unwrap().token, 1);
        assert_eq!(radio.stats().deliveries_dropped, 1);
    }

    #[test]
    fn test_paced_feed_replays_delays() {
        let mut radio =
            ByteRadio::new(MoteId::new(2), ChipModel::tr1001(), EmulatedChip::register());
        let mut ctx = SimContext::new(SimTime::ZERO);
        radio.set_received_packet(RadioPacket::new(vec![0x42]), &mut ctx).unwrap();
        let frame = encode_frame(&ChipModel::tr1001().layout, &[0x42]).unwrap();
        assert_eq!(radio.queued_bytes(), frame.len());

        let mut received = Vec::new();
        let mut cycles = 5000;
        for _ in 0..frame.len() {
            radio.pump(CpuCycles::new(cycles));
            received.extend(radio.port_mut().read_byte());
            // Not enough cycles for the next byte yet.
            assert_eq!(radio.pump(CpuCycles::new(cycles + 1199)), 0);
            cycles += 1200;
        }
        assert_eq!(received, frame);
        assert_eq!(radio.stats().bytes_dropped, 0);
    }

    #[test]
    fn test_paced_feed_drops_unread_bytes() {
        let mut radio =
            ByteRadio::new(MoteId::new(2), ChipModel::tr1001(), EmulatedChip::register());
        let mut ctx = SimContext::new(SimTime::ZERO);
        radio.set_received_packet(RadioPacket::new(vec![1, 2, 3]), &mut ctx).unwrap();

        radio.pump(CpuCycles::new(0));
        // Firmware never reads: everything after the first byte is lost.
        radio.pump(CpuCycles::new(1_000_000));
        assert_eq!(radio.stats().bytes_delivered, 1);
        assert_eq!(radio.stats().bytes_dropped, radio.model().layout.frame_len(3) as u64 - 1);
    }

    #[test]
    fn test_interference_clears_paced_queue() {
        let mut radio =
            ByteRadio::new(MoteId::new(2), ChipModel::tr1001(), EmulatedChip::register());
        let mut ctx = SimContext::new(SimTime::ZERO);
        radio.signal_reception_start(&mut ctx);
        radio.set_received_packet(RadioPacket::new(vec![1, 2, 3]), &mut ctx).unwrap();
        radio.interfere_any_reception(&mut ctx);

        assert_eq!(radio.queued_bytes(), 0);
        assert_eq!(
            radio.set_received_packet(RadioPacket::new(vec![4]), &mut ctx),
            Err(RadioError::Interfered)
        );
    }

    #[test]
    fn test_rejects_empty_packet() {
        let mut radio = cc2420_radio();
        let mut ctx = SimContext::new(SimTime::ZERO);
        assert_eq!(
            radio.set_received_packet(RadioPacket::default(), &mut ctx),
            Err(RadioError::EmptyPacket)
        );
    }
}
