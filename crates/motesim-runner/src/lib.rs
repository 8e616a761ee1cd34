//! Simulation engine and runner for motesim.
//!
//! - [`simulation`]: the single-threaded discrete-event loop over fine and
//!   coarse motes
//! - [`scheduler`]: a handle running a simulation on a background thread
//! - [`scenario`]: YAML-configured demo motes and run reports
//! - [`pacing`] and [`watchdog`]: wall-clock pacing and slow-event alerts
//!
//! ```no_run
//! use motesim_runner::{scenario, ScenarioConfig, SimTime};
//!
//! let config = ScenarioConfig::load("demos/basic.yaml")?;
//! let (mut sim, motes) = scenario::build(&config)?;
//! sim.run_until(SimTime::from_millis(10_000));
//! for mote in &motes {
//!     println!("{:?}", mote.report());
//! }
//! # Ok::<(), motesim_runner::RunnerError>(())
//! ```

pub mod config;
pub mod pacing;
pub mod scenario;
pub mod scheduler;
pub mod simulation;
pub mod watchdog;

pub use config::{
    ConfigError, MoteBehavior, MoteConfig, RunnerError, ScenarioConfig, SimulationConfig,
};
pub use motesim_common::{MoteId, SimTime};
pub use pacing::RunControl;
pub use scenario::{build, MoteHandle, MoteReport, RunReport};
pub use scheduler::Scheduler;
pub use simulation::{
    Action, FnEvent, MoteSet, SharedView, Simulation, SimulationEvent, SimulationStats,
    StopReason, Subscribers, TimeEvent,
};
