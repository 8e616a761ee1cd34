//! Scheduler and simulation loop tests.
//!
//! These drive the engine with small instrumented motes that record when
//! and how often they are called.

use motesim_common::{Mote, MoteError, MoteId, MoteKind, Radio, SimContext, SimError, SimTime};
use motesim_radio::policy::FullMesh;
use motesim_radio::RadioMedium;
use motesim_runner::{
    FnEvent, RunControl, Scheduler, Simulation, SimulationConfig, SimulationEvent, StopReason,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Test Motes
// ============================================================================

type Log = Arc<Mutex<Vec<(String, SimTime)>>>;

/// Records every tick. Fine motes ask for `extra_sweeps` more sweeps per ms.
struct Recorder {
    id: MoteId,
    kind: MoteKind,
    label: String,
    extra_sweeps: u32,
    remaining: u32,
    current: Option<SimTime>,
    log: Log,
}

impl Recorder {
    fn new(id: u32, kind: MoteKind, label: &str, extra_sweeps: u32, log: &Log) -> Self {
        Recorder {
            id: MoteId::new(id),
            kind,
            label: label.to_string(),
            extra_sweeps,
            remaining: 0,
            current: None,
            log: Arc::clone(log),
        }
    }
}

impl Mote for Recorder {
    fn id(&self) -> MoteId {
        self.id
    }

    fn kind(&self) -> MoteKind {
        self.kind
    }

    fn tick(&mut self, ctx: &mut SimContext) -> Result<bool, MoteError> {
        if self.current != Some(ctx.now()) {
            self.current = Some(ctx.now());
            self.remaining = self.extra_sweeps;
        }
        self.log.lock().push((self.label.clone(), ctx.now()));
        if self.remaining > 0 {
            self.remaining -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn radio(&self) -> Option<&dyn Radio> {
        None
    }

    fn radio_mut(&mut self) -> Option<&mut dyn Radio> {
        None
    }
}

/// Fails at a given time, by error or by panic.
struct Faulty {
    id: MoteId,
    at: SimTime,
    panic: bool,
}

impl Mote for Faulty {
    fn id(&self) -> MoteId {
        self.id
    }

    fn kind(&self) -> MoteKind {
        MoteKind::Coarse
    }

    fn tick(&mut self, ctx: &mut SimContext) -> Result<bool, MoteError> {
        if ctx.now() == self.at {
            if self.panic {
                panic!("boom at {}", ctx.now());
            }
            return Err(MoteError::Firmware("stack overflow".to_string()));
        }
        Ok(false)
    }

    fn radio(&self) -> Option<&dyn Radio> {
        None
    }

    fn radio_mut(&mut self) -> Option<&mut dyn Radio> {
        None
    }
}

fn simulation() -> Simulation {
    Simulation::new(
        SimulationConfig::immediate(),
        RadioMedium::new(Box::new(FullMesh)),
    )
}

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn ticks_of(log: &Log, label: &str) -> usize {
    log.lock().iter().filter(|(l, _)| l == label).count()
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_fine_mote_swept_until_idle() {
    let log = new_log();
    let mut sim = simulation();
    sim.add_mote(Box::new(Recorder::new(1, MoteKind::Fine, "fine", 3, &log)))
        .unwrap();

    sim.tick_once(&RunControl::new()).unwrap();
    assert_eq!(ticks_of(&log, "fine"), 4);
    assert_eq!(sim.stats().fine_sweeps, 4);

    sim.tick_once(&RunControl::new()).unwrap();
    assert_eq!(ticks_of(&log, "fine"), 8);
}

#[test]
fn test_every_fine_mote_swept_while_one_is_busy() {
    let log = new_log();
    let mut sim = simulation();
    sim.add_mote(Box::new(Recorder::new(1, MoteKind::Fine, "busy", 2, &log)))
        .unwrap();
    sim.add_mote(Box::new(Recorder::new(2, MoteKind::Fine, "idle", 0, &log)))
        .unwrap();

    sim.tick_once(&RunControl::new()).unwrap();
    assert_eq!(ticks_of(&log, "busy"), 3);
    assert_eq!(ticks_of(&log, "idle"), 3);
}

#[test]
fn test_fine_motes_run_before_coarse_motes() {
    let log = new_log();
    let mut sim = simulation();
    // Coarse added first to show order is by class, not registration.
    sim.add_mote(Box::new(Recorder::new(1, MoteKind::Coarse, "coarse", 0, &log)))
        .unwrap();
    sim.add_mote(Box::new(Recorder::new(2, MoteKind::Fine, "fine", 1, &log)))
        .unwrap();

    sim.run_until(SimTime::from_millis(2));
    let labels: Vec<_> = log.lock().iter().map(|(l, t)| (l.clone(), t.as_millis())).collect();
    let expected: Vec<_> = (0..=2u64)
        .flat_map(|t| [("fine".to_string(), t), ("fine".to_string(), t), ("coarse".to_string(), t)])
        .collect();
    assert_eq!(labels, expected);
}

/// Step once and name the recurring action that ran.
fn step_action(sim: &mut Simulation, control: &RunControl) -> (&'static str, u64) {
    let before = sim.stats().clone();
    let time = sim.step(control).unwrap().unwrap();
    let after = sim.stats();
    let action = if after.fine_sweeps > before.fine_sweeps {
        "fine"
    } else if after.coarse_ticks > before.coarse_ticks {
        "coarse"
    } else if after.throttle_sleeps > before.throttle_sleeps {
        "throttle"
    } else {
        "other"
    };
    (action, time.as_millis())
}

#[test]
fn test_throttle_runs_after_sweep_settles() {
    let log = new_log();
    let mut sim = simulation();
    sim.add_mote(Box::new(Recorder::new(1, MoteKind::Fine, "fine", 3, &log)))
        .unwrap();
    sim.add_mote(Box::new(Recorder::new(2, MoteKind::Coarse, "coarse", 0, &log)))
        .unwrap();
    sim.set_delay(1).unwrap();

    let control = RunControl::new();
    let order: Vec<_> = (0..6).map(|_| step_action(&mut sim, &control)).collect();
    assert_eq!(
        order,
        [
            ("fine", 0),
            ("coarse", 0),
            ("throttle", 0),
            ("fine", 1),
            ("coarse", 1),
            ("throttle", 1),
        ]
    );
    assert_eq!(sim.stats().fine_sweeps, 8);
}

#[test]
fn test_throttle_rearmed_mid_run_keeps_order() {
    let log = new_log();
    let mut sim = simulation();
    sim.add_mote(Box::new(Recorder::new(1, MoteKind::Fine, "fine", 1, &log)))
        .unwrap();
    sim.run_until(SimTime::from_millis(2));
    assert_eq!(sim.stats().throttle_sleeps, 0);

    sim.set_delay(1).unwrap();
    let control = RunControl::new();
    let order: Vec<_> = (0..4).map(|_| step_action(&mut sim, &control)).collect();
    assert_eq!(
        order,
        [("throttle", 2), ("fine", 3), ("coarse", 3), ("throttle", 3)]
    );
}

#[test]
fn test_custom_events_interleave_in_fifo_order() {
    let log = new_log();
    let mut sim = simulation();
    sim.add_mote(Box::new(Recorder::new(1, MoteKind::Coarse, "coarse", 0, &log)))
        .unwrap();

    for name in ["first", "second"] {
        let log = Arc::clone(&log);
        let event = FnEvent::new(name, move |sim: &mut Simulation| {
            log.lock().push((name.to_string(), sim.now()));
            Ok(None)
        });
        sim.schedule_event(Box::new(event), SimTime::from_millis(1))
            .unwrap();
    }

    sim.run_until(SimTime::from_millis(1));
    let labels: Vec<_> = log.lock().iter().map(|(l, _)| l.clone()).collect();
    // Both events were queued before the recurring actions for t=1.
    assert_eq!(labels, ["coarse", "first", "second", "coarse"]);
}

#[test]
fn test_throttle_paces_wall_clock() {
    let mut sim = simulation();
    sim.set_delay(5).unwrap();
    let start = Instant::now();
    sim.run_until(SimTime::from_millis(9));
    assert_eq!(sim.stats().throttle_sleeps, 10);
    assert!(start.elapsed() >= Duration::from_millis(50));

    sim.set_delay(0).unwrap();
    sim.run_until(SimTime::from_millis(19));
    assert_eq!(sim.stats().throttle_sleeps, 10);
}

// ============================================================================
// Faults
// ============================================================================

#[test]
fn test_mote_error_is_fatal() {
    let mut sim = simulation();
    sim.add_mote(Box::new(Faulty {
        id: MoteId::new(4),
        at: SimTime::from_millis(3),
        panic: false,
    }))
    .unwrap();

    let reason = sim.run_until(SimTime::from_millis(100));
    match reason {
        StopReason::Fault(SimError::MoteTickFault { mote, time, message }) => {
            assert_eq!(mote, MoteId::new(4));
            assert_eq!(time, SimTime::from_millis(3));
            assert!(message.contains("stack overflow"), "{}", message);
        }
        other => panic!("unexpected stop: {:?}", other),
    }
    assert_eq!(sim.stats().mote_faults, 1);
}

#[test]
fn test_mote_panic_is_fatal() {
    let mut sim = simulation();
    sim.add_mote(Box::new(Faulty {
        id: MoteId::new(5),
        at: SimTime::from_millis(2),
        panic: true,
    }))
    .unwrap();

    let reason = sim.run_until(SimTime::from_millis(100));
    match reason {
        StopReason::Fault(SimError::MoteTickFault { mote, message, .. }) => {
            assert_eq!(mote, MoteId::new(5));
            assert!(message.contains("boom"), "{}", message);
        }
        other => panic!("unexpected stop: {:?}", other),
    }
    assert_eq!(sim.now(), SimTime::from_millis(2));
}

#[test]
fn test_remove_mote_drops_its_timers() {
    let log = new_log();
    let mut sim = simulation();
    sim.add_mote(Box::new(Recorder::new(1, MoteKind::Coarse, "a", 0, &log)))
        .unwrap();
    sim.add_mote(Box::new(Recorder::new(2, MoteKind::Coarse, "b", 0, &log)))
        .unwrap();
    sim.run_until(SimTime::from_millis(4));

    let removed = sim.remove_mote(MoteId::new(1)).unwrap();
    assert_eq!(removed.id(), MoteId::new(1));
    assert!(matches!(
        sim.remove_mote(MoteId::new(1)),
        Err(SimError::UnknownMote(_))
    ));

    sim.run_until(SimTime::from_millis(9));
    assert_eq!(ticks_of(&log, "a"), 5);
    assert_eq!(ticks_of(&log, "b"), 10);
    assert_eq!(sim.coarse_motes(), &[MoteId::new(2)]);
}

// ============================================================================
// Scheduler Thread
// ============================================================================

#[test]
fn test_scheduler_runs_to_limit() {
    let log = new_log();
    let mut sim = simulation();
    sim.add_mote(Box::new(Recorder::new(1, MoteKind::Coarse, "coarse", 0, &log)))
        .unwrap();
    let mut scheduler = Scheduler::new(sim).unwrap();
    let events = scheduler.subscribe();

    scheduler.start_until(Some(SimTime::from_millis(2))).unwrap();
    assert_eq!(scheduler.wait().unwrap(), Some(StopReason::TimeLimit));
    assert_eq!(scheduler.simulation_time(), SimTime::from_millis(2));

    let received: Vec<_> = events.try_iter().collect();
    assert_eq!(
        received,
        vec![
            SimulationEvent::Started { time: SimTime::ZERO },
            SimulationEvent::TickPerformed(SimTime::from_millis(0)),
            SimulationEvent::TickPerformed(SimTime::from_millis(1)),
            SimulationEvent::TickPerformed(SimTime::from_millis(2)),
            SimulationEvent::Stopped {
                time: SimTime::from_millis(2),
                reason: StopReason::TimeLimit,
            },
        ]
    );
}

#[test]
fn test_stop_and_restart_resume_the_queue() {
    let log = new_log();
    let mut sim = simulation();
    sim.add_mote(Box::new(Recorder::new(1, MoteKind::Coarse, "coarse", 0, &log)))
        .unwrap();
    let mut scheduler = Scheduler::new(sim).unwrap();
    let events = scheduler.subscribe();

    scheduler.start().unwrap();
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(scheduler.stop().unwrap(), Some(StopReason::Requested));
    assert!(!scheduler.is_running());
    let paused_at = scheduler.simulation_time();
    let ticks_at_pause = ticks_of(&log, "coarse");

    scheduler.start().unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(SimulationEvent::TickPerformed(t)) if t > paused_at => break,
            Ok(_) => continue,
            Err(e) => panic!("no tick after restart: {}", e),
        }
    }
    scheduler.stop().unwrap();

    let sim = scheduler.into_simulation().unwrap();
    assert!(ticks_of(&log, "coarse") > ticks_at_pause);
    assert_eq!(ticks_of(&log, "coarse") as u64, sim.stats().coarse_ticks);
    // No millisecond ran twice.
    let times: Vec<_> = log.lock().iter().map(|(_, t)| t.as_millis()).collect();
    assert!(times.windows(2).all(|w| w[1] == w[0] + 1));
}

#[test]
fn test_add_mote_while_running() {
    let log = new_log();
    let mut scheduler = Scheduler::new(simulation()).unwrap();
    scheduler.start().unwrap();
    std::thread::sleep(Duration::from_millis(5));

    scheduler
        .add_mote(Box::new(Recorder::new(7, MoteKind::Coarse, "late", 0, &log)))
        .unwrap();
    assert!(scheduler.is_running());
    std::thread::sleep(Duration::from_millis(5));
    scheduler.stop().unwrap();

    assert!(ticks_of(&log, "late") > 0);
    let added_at = log.lock()[0].1;
    assert!(added_at > SimTime::ZERO);
}

#[test]
fn test_scheduling_violation_stops_scheduler() {
    let mut scheduler = Scheduler::new(simulation()).unwrap();
    let event = FnEvent::new("backwards", |_: &mut Simulation| Ok(Some(SimTime::ZERO)));
    scheduler
        .schedule_event(Box::new(event), SimTime::from_millis(3))
        .unwrap();

    scheduler.start().unwrap();
    let reason = scheduler.wait().unwrap();
    assert!(matches!(
        reason,
        Some(StopReason::Fault(SimError::SchedulingViolation { .. }))
    ));
    assert_eq!(scheduler.simulation_time(), SimTime::from_millis(3));
}

#[test]
fn test_tick_once_while_stopped() {
    let log = new_log();
    let mut sim = simulation();
    sim.add_mote(Box::new(Recorder::new(1, MoteKind::Coarse, "coarse", 0, &log)))
        .unwrap();
    let mut scheduler = Scheduler::new(sim).unwrap();

    assert_eq!(scheduler.tick_once().unwrap(), Some(SimTime::ZERO));
    assert_eq!(scheduler.tick_once().unwrap(), Some(SimTime::from_millis(1)));
    assert_eq!(ticks_of(&log, "coarse"), 2);
    assert_eq!(
        scheduler.simulation().and_then(|s| s.last_stop_reason()),
        Some(&StopReason::TickCompleted)
    );
}
