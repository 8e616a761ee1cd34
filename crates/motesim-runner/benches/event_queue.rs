//! Benchmarks for the event queue and the simulation loop.
//!
//! ```bash
//! cargo bench -p motesim-runner
//! ```
//!
//! - `event_queue/schedule_pop_N` - schedule N events at mixed times, pop all
//! - `simulation/beacons_N` - run N beacon motes for one simulated second
//! - `simulation/byte_motes_N` - run N byte motes for 100 simulated ms

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use motesim_common::{EventQueue, SimTime};
use motesim_runner::{build, MoteBehavior, MoteConfig, ScenarioConfig, SimulationConfig};
use motesim_radio::{ChipKind, MediumConfig, StalledDelivery};

fn bench_event_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_queue");

    for count in [1_000u64, 10_000, 100_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(
            BenchmarkId::new("schedule_pop", count),
            &count,
            |b, &count| {
                b.iter(|| {
                    let mut queue = EventQueue::new();
                    for i in 0..count {
                        // Interleave times so the heap does real work.
                        let time = SimTime::from_millis((i * 7919) % 1000);
                        queue.schedule(i, time).unwrap();
                    }
                    let mut total = 0u64;
                    while let Some(event) = queue.pop_earliest() {
                        total = total.wrapping_add(event.action);
                    }
                    black_box(total)
                });
            },
        );
    }

    group.finish();
}

fn scenario(motes: Vec<MoteConfig>) -> ScenarioConfig {
    ScenarioConfig {
        simulation: SimulationConfig::immediate(),
        medium: MediumConfig::FullMesh,
        motes,
    }
}

fn bench_simulation(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulation");
    group.sample_size(10);

    for count in [2u32, 8, 32] {
        let beacons = scenario(
            (1..=count)
                .map(|id| MoteConfig {
                    id,
                    name: None,
                    position: Default::default(),
                    behavior: MoteBehavior::Beacon {
                        period_ms: 100,
                        offset_ms: u64::from(id) * 3,
                        payload_len: 20,
                    },
                })
                .collect(),
        );
        group.bench_with_input(BenchmarkId::new("beacons", count), &beacons, |b, config| {
            b.iter(|| {
                let (mut sim, _) = build(config).unwrap();
                black_box(sim.run_until(SimTime::from_millis(999)))
            });
        });
    }

    for count in [2u32, 8] {
        let byte_motes = scenario(
            (1..=count)
                .map(|id| MoteConfig {
                    id,
                    name: None,
                    position: Default::default(),
                    behavior: MoteBehavior::ByteMote {
                        chip: ChipKind::Cc2420,
                        period_ms: Some(25),
                        offset_ms: u64::from(id) * 5,
                        payload_len: 20,
                        stalled: StalledDelivery::HoldUntilReplaced,
                        channel: None,
                    },
                })
                .collect(),
        );
        group.bench_with_input(
            BenchmarkId::new("byte_motes", count),
            &byte_motes,
            |b, config| {
                b.iter(|| {
                    let (mut sim, _) = build(config).unwrap();
                    black_box(sim.run_until(SimTime::from_millis(99)))
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_event_queue, bench_simulation);
criterion_main!(benches);
