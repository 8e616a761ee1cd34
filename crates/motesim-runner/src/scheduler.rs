//! Background scheduler thread.
//!
//! The [`Scheduler`] owns a [`Simulation`] and runs it on a named thread.
//! While the thread runs, the simulation is moved into it; time and medium
//! state stay readable through the [`SharedView`]. Every mutation goes
//! through [`Scheduler::with_stopped`], which stops the thread, applies the
//! change on the caller's thread and resumes if it was running.

use crate::config::RunnerError;
use crate::pacing::RunControl;
use crate::simulation::{
    SharedView, Simulation, SimulationEvent, StopReason, Subscribers, TimeEvent,
};
use crate::watchdog::Watchdog;
use crossbeam_channel::Receiver;
use motesim_common::{Mote, MoteId, SimTime};
use motesim_radio::MediumSnapshot;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// Runs a simulation on a background thread.
pub struct Scheduler {
    simulation: Option<Simulation>,
    thread: Option<JoinHandle<Simulation>>,
    control: RunControl,
    shared: SharedView,
    subscribers: Subscribers,
    limit: Option<SimTime>,
    watchdog: Option<Watchdog>,
}

impl Scheduler {
    /// Take ownership of a stopped simulation.
    ///
    /// Starts the watchdog thread if the simulation config enables one.
    pub fn new(mut simulation: Simulation) -> Result<Self, RunnerError> {
        let watchdog = match simulation.config().watchdog_timeout_ms {
            Some(ms) => {
                let watchdog = Watchdog::new(Duration::from_millis(ms))?;
                watchdog.state().set_seed(simulation.config().random_seed);
                simulation.set_watchdog(Arc::clone(watchdog.state()));
                Some(watchdog)
            }
            None => None,
        };
        Ok(Scheduler {
            shared: simulation.shared_view(),
            subscribers: simulation.subscribers().clone(),
            simulation: Some(simulation),
            thread: None,
            control: RunControl::new(),
            limit: None,
            watchdog,
        })
    }

    /// Run until stopped or the queue empties.
    pub fn start(&mut self) -> Result<(), RunnerError> {
        self.start_until(None)
    }

    /// Run until stopped, the queue empties, or the next event lies after
    /// `limit`. Does nothing if already running.
    pub fn start_until(&mut self, limit: Option<SimTime>) -> Result<(), RunnerError> {
        if self.thread.is_some() {
            return Ok(());
        }
        let Some(mut simulation) = self.simulation.take() else {
            return Err(RunnerError::SchedulerPanicked);
        };
        self.limit = limit;
        self.control.reset();
        let control = self.control.clone();
        let handle = thread::Builder::new()
            .name("motesim-scheduler".to_string())
            .spawn(move || {
                let reason = simulation.run(&control, limit);
                debug!("Scheduler thread exiting: {}", reason);
                simulation
            })?;
        self.thread = Some(handle);
        Ok(())
    }

    /// Stop the thread and wait for it. Returns why the run ended.
    pub fn stop(&mut self) -> Result<Option<StopReason>, RunnerError> {
        if let Some(handle) = &self.thread {
            self.control.request_stop();
            handle.thread().unpark();
        }
        self.wait()
    }

    /// Wait for the thread to end on its own.
    pub fn wait(&mut self) -> Result<Option<StopReason>, RunnerError> {
        if let Some(handle) = self.thread.take() {
            let simulation = handle.join().map_err(|_| RunnerError::SchedulerPanicked)?;
            self.simulation = Some(simulation);
        }
        Ok(self
            .simulation
            .as_ref()
            .and_then(|s| s.last_stop_reason().cloned()))
    }

    /// Whether the thread is still dispatching events.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop flag for this scheduler.
    pub fn control(&self) -> &RunControl {
        &self.control
    }

    /// Time of the last dispatched event.
    pub fn simulation_time(&self) -> SimTime {
        self.shared.simulation_time()
    }

    /// Latest medium snapshot.
    pub fn medium_snapshot(&self) -> MediumSnapshot {
        self.shared.medium_snapshot()
    }

    /// Open a subscription.
    pub fn subscribe(&self) -> Receiver<SimulationEvent> {
        self.subscribers.subscribe()
    }

    /// Stop, apply `f` to the simulation, and resume if a stop request
    /// interrupted a run.
    pub fn with_stopped<R>(
        &mut self,
        f: impl FnOnce(&mut Simulation) -> R,
    ) -> Result<R, RunnerError> {
        let was_running = self.is_running();
        let reason = self.stop()?;
        let simulation = self
            .simulation
            .as_mut()
            .ok_or(RunnerError::SchedulerPanicked)?;
        let result = f(simulation);
        if was_running && reason == Some(StopReason::Requested) {
            info!("Resuming simulation at {}", simulation.now());
            self.start_until(self.limit)?;
        }
        Ok(result)
    }

    /// Schedule a user event.
    pub fn schedule_event(
        &mut self,
        event: Box<dyn TimeEvent>,
        time: SimTime,
    ) -> Result<u64, RunnerError> {
        self.with_stopped(|sim| sim.schedule_event(event, time))?
            .map_err(RunnerError::from)
    }

    /// Add a mote.
    pub fn add_mote(&mut self, mote: Box<dyn Mote>) -> Result<(), RunnerError> {
        self.with_stopped(|sim| sim.add_mote(mote))?.map_err(RunnerError::from)
    }

    /// Remove a mote.
    pub fn remove_mote(&mut self, mote: MoteId) -> Result<Box<dyn Mote>, RunnerError> {
        self.with_stopped(|sim| sim.remove_mote(mote))?.map_err(RunnerError::from)
    }

    /// Change the pacing delay.
    pub fn set_delay(&mut self, delay_ms: u64) -> Result<(), RunnerError> {
        self.with_stopped(|sim| sim.set_delay(delay_ms))?.map_err(RunnerError::from)
    }

    /// Stop and dispatch one millisecond on the caller's thread.
    pub fn tick_once(&mut self) -> Result<Option<SimTime>, RunnerError> {
        self.stop()?;
        let simulation = self
            .simulation
            .as_mut()
            .ok_or(RunnerError::SchedulerPanicked)?;
        simulation
            .tick_once(&RunControl::new())
            .map_err(RunnerError::from)
    }

    /// The simulation, if the thread is not running.
    pub fn simulation(&self) -> Option<&Simulation> {
        self.simulation.as_ref()
    }

    /// The simulation, if the thread is not running.
    pub fn simulation_mut(&mut self) -> Option<&mut Simulation> {
        self.simulation.as_mut()
    }

    /// Stop and give back the simulation.
    pub fn into_simulation(mut self) -> Result<Simulation, RunnerError> {
        self.stop()?;
        self.simulation.take().ok_or(RunnerError::SchedulerPanicked)
    }

    /// Watchdog alerts fired so far.
    pub fn watchdog_alerts(&self) -> u64 {
        self.watchdog.as_ref().map_or(0, |w| w.state().alert_count())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
