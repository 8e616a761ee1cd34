//! Radio medium.
//!
//! The medium keeps the registry of radios and one [`Connection`] per ongoing
//! transmission. It reacts to the notifications radios emit:
//!
//! - `TransmissionStarted` opens a connection to every reachable, idle or
//!   receiving radio on the same channel. A radio already receiving another
//!   transmission is interfered in both.
//! - `PacketTransmitted` attaches the packet it carries to the connection.
//! - `TransmissionFinished` closes the connection, delivers the packet to the
//!   receivers that were not interfered and ends their receptions.
//!
//! Radios are reached through a [`RadioDirectory`], so the medium never owns
//! a mote.

use crate::mote_label;
use crate::policy::{build_policy, ConnectivityPolicy, MediumConfig, PolicyError, RadioNode};
use motesim_common::tracer::MoteTracer;
use motesim_common::{
    MoteId, Position, RadioDirectory, RadioEventKind, RadioNotification, RadioPacket, SimContext,
    SimTime,
};
use motesim_metrics::metric_defs;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, trace, warn};

/// An ongoing transmission.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Sender.
    pub source: MoteId,
    /// When the transmission started.
    pub started: SimTime,
    /// Packet, once the sender reported it.
    pub packet: Option<RadioPacket>,
    /// Radios that hear this transmission, in registration order.
    pub receivers: Vec<MoteId>,
    /// Receivers whose copy is corrupted.
    pub interfered: BTreeSet<MoteId>,
}

impl Connection {
    fn is_receiver(&self, mote: MoteId) -> bool {
        self.receivers.contains(&mote)
    }
}

/// Point-in-time view of the medium.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediumSnapshot {
    /// Radios currently sending.
    pub transmitting: Vec<MoteId>,
    /// Radios receiving a clean transmission.
    pub receiving: Vec<MoteId>,
    /// Radios receiving overlapping transmissions.
    pub interfered: Vec<MoteId>,
    /// Number of registered radios.
    pub registered: usize,
}

/// Cumulative medium counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediumStats {
    /// Transmissions started.
    pub transmissions: u64,
    /// Packets handed to receivers.
    pub packets_delivered: u64,
    /// Receivers that were interfered.
    pub collisions: u64,
    /// Packets rejected for having no payload.
    pub empty_packets: u64,
    /// Transmissions that ended without a packet.
    pub unfinished: u64,
    /// Deliveries refused by the receiving radio.
    pub delivery_failures: u64,
}

/// The radio medium.
pub struct RadioMedium {
    policy: Box<dyn ConnectivityPolicy>,
    nodes: BTreeMap<MoteId, Position>,
    connections: Vec<Connection>,
    stats: MediumStats,
    tracer: MoteTracer,
}

impl RadioMedium {
    /// Create a medium with the given policy.
    pub fn new(policy: Box<dyn ConnectivityPolicy>) -> Self {
        RadioMedium {
            policy,
            nodes: BTreeMap::new(),
            connections: Vec::new(),
            stats: MediumStats::default(),
            tracer: MoteTracer::disabled(),
        }
    }

    /// Create the medium a config selects.
    pub fn from_config(config: &MediumConfig) -> Result<Self, PolicyError> {
        Ok(Self::new(build_policy(config)?))
    }

    /// Attach a tracer for per-mote delivery traces.
    pub fn with_tracer(mut self, tracer: MoteTracer) -> Self {
        self.tracer = tracer;
        self
    }

    /// The connectivity policy.
    pub fn policy(&self) -> &dyn ConnectivityPolicy {
        self.policy.as_ref()
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// Register a mote's radio. Returns false if it was already registered.
    pub fn register_mote(&mut self, mote: MoteId, position: Position) -> bool {
        if self.nodes.contains_key(&mote) {
            warn!("{} registered twice with the radio medium", mote);
            return false;
        }
        debug!("Registered {} at ({:.1}, {:.1})", mote, position.x, position.y);
        self.nodes.insert(mote, position);
        true
    }

    /// Unregister a mote's radio.
    ///
    /// Transmissions from the mote are cancelled and its receivers released;
    /// deliveries addressed to it are dropped. Returns false if the mote was
    /// not registered.
    pub fn unregister_mote(
        &mut self,
        mote: MoteId,
        radios: &mut dyn RadioDirectory,
        ctx: &mut SimContext,
    ) -> bool {
        if self.nodes.remove(&mote).is_none() {
            return false;
        }

        let (cancelled, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.connections)
            .into_iter()
            .partition(|c| c.source == mote);
        self.connections = kept;

        for connection in &mut self.connections {
            connection.receivers.retain(|r| *r != mote);
            connection.interfered.remove(&mote);
        }

        for connection in cancelled {
            debug!("Cancelled transmission from unregistered {}", mote);
            for receiver in connection.receivers {
                self.release_receiver(receiver, radios, ctx);
            }
        }

        debug!("Unregistered {}", mote);
        true
    }

    /// Move a registered mote.
    pub fn set_position(&mut self, mote: MoteId, position: Position) {
        if let Some(p) = self.nodes.get_mut(&mote) {
            *p = position;
        }
    }

    /// Whether a mote is registered.
    pub fn is_registered(&self, mote: MoteId) -> bool {
        self.nodes.contains_key(&mote)
    }

    /// Registered motes in ID order.
    pub fn registered(&self) -> impl Iterator<Item = MoteId> + '_ {
        self.nodes.keys().copied()
    }

    /// Ongoing transmissions.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Cumulative counters.
    pub fn stats(&self) -> &MediumStats {
        &self.stats
    }

    /// Which radios are sending, receiving and interfered.
    pub fn snapshot(&self) -> MediumSnapshot {
        let mut transmitting = BTreeSet::new();
        let mut receiving = BTreeSet::new();
        let mut interfered = BTreeSet::new();
        for connection in &self.connections {
            transmitting.insert(connection.source);
            for receiver in &connection.receivers {
                if connection.interfered.contains(receiver) {
                    interfered.insert(*receiver);
                } else {
                    receiving.insert(*receiver);
                }
            }
        }
        // A sender that was receiving only counts as sending.
        let interfered: BTreeSet<_> = interfered.difference(&transmitting).copied().collect();
        let receiving = receiving
            .iter()
            .filter(|m| !interfered.contains(m) && !transmitting.contains(m))
            .copied()
            .collect();
        MediumSnapshot {
            transmitting: transmitting.into_iter().collect(),
            receiving,
            interfered: interfered.into_iter().collect(),
            registered: self.nodes.len(),
        }
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    /// React to a radio notification.
    pub fn handle_notification(
        &mut self,
        notification: &RadioNotification,
        radios: &mut dyn RadioDirectory,
        ctx: &mut SimContext,
    ) {
        if !self.nodes.contains_key(&notification.mote) {
            trace!("Ignoring {:?} from unregistered {}", notification.kind, notification.mote);
            return;
        }
        match notification.kind {
            RadioEventKind::TransmissionStarted => {
                self.start_transmission(notification.mote, radios, ctx)
            }
            RadioEventKind::PacketTransmitted => {
                self.attach_packet(notification.mote, notification.packet.clone())
            }
            RadioEventKind::TransmissionFinished => {
                self.finish_transmission(notification.mote, radios, ctx)
            }
            _ => {}
        }
    }

    fn start_transmission(
        &mut self,
        source: MoteId,
        radios: &mut dyn RadioDirectory,
        ctx: &mut SimContext,
    ) {
        if self.connections.iter().any(|c| c.source == source) {
            warn!("{} started a transmission while one was open; closing the old one", source);
            self.finish_transmission(source, radios, ctx);
        }

        let Some(channel) = radios.radio_mut(source).map(|r| r.channel()) else {
            warn!("{} is registered but has no radio", source);
            return;
        };
        let Some(&source_position) = self.nodes.get(&source) else {
            return;
        };
        let source_node = RadioNode {
            mote: source,
            position: source_position,
        };

        // A radio that starts sending loses whatever it was receiving.
        for connection in &mut self.connections {
            if connection.is_receiver(source) {
                connection.interfered.insert(source);
            }
        }

        let mut receivers = Vec::new();
        for (&mote, &position) in &self.nodes {
            if mote == source {
                continue;
            }
            let destination = RadioNode { mote, position };
            if !self.policy.can_reach(&source_node, &destination) {
                continue;
            }
            let Some(radio) = radios.radio_mut(mote) else {
                continue;
            };
            if radio.channel() != channel || radio.is_transmitting() {
                continue;
            }
            receivers.push(mote);
        }

        let mut interfered = BTreeSet::new();
        for &receiver in &receivers {
            let Some(radio) = radios.radio_mut(receiver) else {
                continue;
            };
            let busy = self.connections.iter().any(|c| c.is_receiver(receiver));
            if busy {
                if !radio.is_interfered() {
                    self.stats.collisions += 1;
                    metrics::counter!(metric_defs::RADIO_COLLISIONS.name, &mote_label(receiver))
                        .increment(1);
                    debug!("Collision at {} ({} joined)", receiver, source);
                }
                radio.interfere_any_reception(ctx);
                for connection in &mut self.connections {
                    if connection.is_receiver(receiver) {
                        connection.interfered.insert(receiver);
                    }
                }
                interfered.insert(receiver);
            } else {
                radio.signal_reception_start(ctx);
            }
        }

        debug!(
            "{} transmitting at {} to {} receiver(s), {} interfered",
            source,
            ctx.now(),
            receivers.len(),
            interfered.len()
        );
        self.stats.transmissions += 1;
        metrics::counter!(metric_defs::RADIO_TX_STARTED.name, &mote_label(source)).increment(1);

        self.connections.push(Connection {
            source,
            started: ctx.now(),
            packet: None,
            receivers,
            interfered,
        });
    }

    fn attach_packet(&mut self, source: MoteId, packet: Option<RadioPacket>) {
        match self.connections.iter_mut().find(|c| c.source == source) {
            Some(connection) => connection.packet = packet,
            None => debug!("{} reported a packet without an open transmission", source),
        }
    }

    fn finish_transmission(
        &mut self,
        source: MoteId,
        radios: &mut dyn RadioDirectory,
        ctx: &mut SimContext,
    ) {
        let Some(index) = self.connections.iter().position(|c| c.source == source) else {
            debug!("{} finished a transmission the medium never saw start", source);
            return;
        };
        let connection = self.connections.remove(index);

        let packet = match connection.packet {
            Some(packet) if packet.is_empty() => {
                error!("Rejected packet with no payload from {}", source);
                self.stats.empty_packets += 1;
                metrics::counter!(metric_defs::RADIO_EMPTY_PACKETS.name).increment(1);
                None
            }
            Some(packet) => Some(packet),
            None => {
                debug!("Transmission from {} ended without a packet", source);
                self.stats.unfinished += 1;
                None
            }
        };

        for &receiver in &connection.receivers {
            if let Some(packet) = &packet {
                if !connection.interfered.contains(&receiver) {
                    self.deliver(source, receiver, packet, radios, ctx);
                }
            }
            self.release_receiver(receiver, radios, ctx);
        }
    }

    fn deliver(
        &mut self,
        source: MoteId,
        receiver: MoteId,
        packet: &RadioPacket,
        radios: &mut dyn RadioDirectory,
        ctx: &mut SimContext,
    ) {
        let Some(radio) = radios.radio_mut(receiver) else {
            return;
        };
        match radio.set_received_packet(packet.clone(), ctx) {
            Ok(()) => {
                self.stats.packets_delivered += 1;
                metrics::counter!(metric_defs::RADIO_RX_PACKETS.name, &mote_label(receiver))
                    .increment(1);
                metrics::histogram!(metric_defs::RADIO_RX_PACKET_SIZE.name)
                    .record(packet.len() as f64);
                self.tracer
                    .log_delivery(None, receiver, ctx.now(), source, packet.len());
            }
            Err(e) => {
                warn!("Delivery from {} to {} failed: {}", source, receiver, e);
                self.stats.delivery_failures += 1;
                metrics::counter!(
                    metric_defs::RADIO_DELIVERY_FAILURES.name,
                    &mote_label(receiver)
                )
                .increment(1);
            }
        }
    }

    /// End a receiver's reception unless another transmission still reaches it.
    fn release_receiver(
        &mut self,
        receiver: MoteId,
        radios: &mut dyn RadioDirectory,
        ctx: &mut SimContext,
    ) {
        if self.connections.iter().any(|c| c.is_receiver(receiver)) {
            return;
        }
        if let Some(radio) = radios.radio_mut(receiver) {
            radio.signal_reception_end(ctx);
        }
    }
}
