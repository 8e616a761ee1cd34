//! Radio tests through the full simulation loop.
//!
//! Packet radios and byte drivers share one medium here, so these cover the
//! notification routing from a mote's context into the medium and back out
//! to the receiving motes.

use motesim_common::{Mote, MoteId, Position, RadioEventKind, SimTime};
use motesim_radio::{ChipModel, MediumConfig, RadioMedium, StalledDelivery};
use motesim_runner::scenario::{BeaconMote, ByteMote};
use motesim_runner::{
    build, MoteBehavior, MoteConfig, RunControl, ScenarioConfig, Simulation, SimulationConfig,
    SimulationEvent,
};
use std::collections::BTreeMap;

fn beacon(id: u32, x: f64, period_ms: u64) -> MoteConfig {
    MoteConfig {
        id,
        name: Some(format!("beacon-{}", id)),
        position: Position::new(x, 0.0),
        behavior: MoteBehavior::Beacon {
            period_ms,
            offset_ms: 0,
            payload_len: 10,
        },
    }
}

fn listener(id: u32, x: f64) -> MoteConfig {
    MoteConfig {
        id,
        name: None,
        position: Position::new(x, 0.0),
        behavior: MoteBehavior::Listener,
    }
}

fn scenario(medium: MediumConfig, motes: Vec<MoteConfig>) -> ScenarioConfig {
    ScenarioConfig {
        simulation: SimulationConfig::immediate(),
        medium,
        motes,
    }
}

fn simulation() -> Simulation {
    Simulation::new(
        SimulationConfig::immediate(),
        RadioMedium::from_config(&MediumConfig::FullMesh).unwrap(),
    )
}

// ============================================================================
// Medium
// ============================================================================

#[test]
fn test_overlapping_beacons_collide() {
    let config = scenario(
        MediumConfig::FullMesh,
        vec![beacon(1, 0.0, 100), beacon(2, 0.0, 100), listener(3, 0.0)],
    );
    let (mut sim, motes) = build(&config).unwrap();

    sim.tick_once(&RunControl::new()).unwrap();
    let snapshot = sim.shared_view().medium_snapshot();
    assert_eq!(snapshot.transmitting, vec![MoteId::new(1), MoteId::new(2)]);
    assert_eq!(snapshot.interfered, vec![MoteId::new(3)]);
    assert!(snapshot.receiving.is_empty());

    sim.run_until(SimTime::from_millis(50));
    assert_eq!(motes[0].report().sent, 1);
    assert_eq!(motes[1].report().sent, 1);
    assert_eq!(motes[2].report().received, 0);
    assert_eq!(sim.medium().stats().collisions, 1);
    assert_eq!(sim.medium().stats().packets_delivered, 0);
}

#[test]
fn test_three_senders_interfere_once() {
    // On air for 1, 2 and 3 ms.
    let senders = [(1, 10), (2, 20), (3, 50)].map(|(id, payload_len)| MoteConfig {
        behavior: MoteBehavior::Beacon {
            period_ms: 100,
            offset_ms: 0,
            payload_len,
        },
        ..beacon(id, 0.0, 100)
    });
    let mut motes = senders.to_vec();
    motes.push(listener(4, 0.0));
    let config = scenario(MediumConfig::FullMesh, motes);
    let (mut sim, motes) = build(&config).unwrap();
    let events = sim.subscribe();

    sim.tick_once(&RunControl::new()).unwrap();
    for ms in 1..=2 {
        sim.run_until(SimTime::from_millis(ms));
        let snapshot = sim.shared_view().medium_snapshot();
        assert_eq!(snapshot.interfered, vec![MoteId::new(4)], "at {} ms", ms);
    }
    sim.run_until(SimTime::from_millis(50));

    let mut interfered = BTreeMap::new();
    let mut listener_events = Vec::new();
    for event in events.try_iter() {
        let SimulationEvent::Radio(n) = event else {
            continue;
        };
        if n.kind == RadioEventKind::ReceptionInterfered {
            *interfered.entry(n.mote.0).or_insert(0) += 1;
        }
        if n.mote == MoteId::new(4) {
            listener_events.push((n.kind, n.time.as_millis()));
        }
    }
    assert!(interfered.values().all(|&count| count == 1), "{:?}", interfered);
    assert_eq!(interfered.get(&4), Some(&1));
    assert_eq!(
        listener_events,
        vec![
            (RadioEventKind::ReceptionStarted, 0),
            (RadioEventKind::ReceptionInterfered, 0),
            (RadioEventKind::ReceptionFinished, 3),
        ]
    );
    assert_eq!(motes[3].report().received, 0);
    assert_eq!(sim.medium().stats().packets_delivered, 0);
}

#[test]
fn test_unit_disk_limits_delivery() {
    let config = scenario(
        MediumConfig::UnitDisk { range_m: 50.0 },
        vec![beacon(1, 0.0, 20), listener(2, 30.0), listener(3, 80.0)],
    );
    let (mut sim, motes) = build(&config).unwrap();
    sim.run_until(SimTime::from_millis(99));

    assert_eq!(motes[0].report().sent, 5);
    assert_eq!(motes[1].report().received, 5);
    assert_eq!(motes[2].report().received, 0);
}

#[test]
fn test_radio_notifications_are_published() {
    let config = scenario(MediumConfig::FullMesh, vec![beacon(1, 0.0, 100), listener(2, 0.0)]);
    let (mut sim, _motes) = build(&config).unwrap();
    let events = sim.subscribe();
    sim.run_until(SimTime::from_millis(5));

    let radio: Vec<_> = events
        .try_iter()
        .filter_map(|e| match e {
            SimulationEvent::Radio(n) => Some((n.mote.0, n.kind, n.time.as_millis())),
            _ => None,
        })
        .collect();
    assert_eq!(
        radio,
        vec![
            (1, RadioEventKind::TransmissionStarted, 0),
            (2, RadioEventKind::ReceptionStarted, 0),
            (1, RadioEventKind::PacketTransmitted, 1),
            (1, RadioEventKind::TransmissionFinished, 1),
            (2, RadioEventKind::ReceptionFinished, 1),
        ]
    );
}

// ============================================================================
// Byte Driver
// ============================================================================

#[test]
fn test_packet_radio_to_byte_mote() {
    let mut sim = simulation();
    let sender = BeaconMote::new(MoteId::new(1), Position::default(), Some(100), 10, 10);
    let receiver = ByteMote::new(
        MoteId::new(2),
        Position::default(),
        ChipModel::cc2420(),
        None,
        0,
        10,
    );
    let received = receiver.counters();
    sim.add_mote(Box::new(sender)).unwrap();
    sim.add_mote(Box::new(receiver)).unwrap();

    sim.run_until(SimTime::from_millis(50));
    assert_eq!(received.received(), 1);
    assert_eq!(received.invalid(), 0);
}

#[test]
fn test_byte_mote_to_packet_radio() {
    let mut sim = simulation();
    let sender = ByteMote::new(
        MoteId::new(1),
        Position::default(),
        ChipModel::cc2420(),
        Some(100),
        5,
        12,
    );
    let receiver = BeaconMote::new(MoteId::new(2), Position::default(), None, 0, 1);
    let sent = sender.counters();
    let received = receiver.counters();
    sim.add_mote(Box::new(sender)).unwrap();
    sim.add_mote(Box::new(receiver)).unwrap();

    sim.run_until(SimTime::from_millis(50));
    assert_eq!(sent.sent(), 1);
    assert_eq!(received.received(), 1);
    assert_eq!(sim.medium().stats().packets_delivered, 1);
}

/// A beacon arrives at t=11 while the byte mote is still booting.
fn late_listener(stalled: StalledDelivery) -> u64 {
    let mut sim = simulation();
    let sender = BeaconMote::new(MoteId::new(1), Position::default(), Some(100), 10, 10);
    let mut receiver = ByteMote::new(
        MoteId::new(2),
        Position::default(),
        ChipModel::cc2420().with_stalled(stalled),
        None,
        0,
        10,
    );
    receiver.set_clock_drift(-30);
    let counters = receiver.counters();
    sim.add_mote(Box::new(sender)).unwrap();
    sim.add_mote(Box::new(receiver)).unwrap();

    sim.run_until(SimTime::from_millis(60));
    assert_eq!(counters.invalid(), 0);
    counters.received()
}

#[test]
fn test_held_frame_delivered_when_chip_listens() {
    assert_eq!(late_listener(StalledDelivery::HoldUntilReplaced), 1);
}

#[test]
fn test_held_frame_expires() {
    assert_eq!(late_listener(StalledDelivery::DropAfter { ticks: 5 }), 0);
}
