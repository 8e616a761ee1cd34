//! Common types and traits for motesim simulation.
//!
//! This crate holds everything the scheduler, the radio medium and the mote
//! implementations agree on:
//!
//! - [`SimTime`] and [`CpuCycles`], the two clocks of a simulation
//! - [`EventQueue`], the time-ordered queue the scheduler pops from
//! - the [`Mote`] and [`Radio`] traits and the [`RadioInterface`] state
//! - [`SimContext`], through which motes arm timers and emit notifications
//! - the [`MoteTracer`](tracer::MoteTracer) for targeted trace output

mod context;
mod error;
mod event;
mod ids;
mod mote;
mod radio;
mod time;
pub mod tracer;

pub use context::*;
pub use error::*;
pub use event::*;
pub use ids::*;
pub use mote::*;
pub use radio::*;
pub use time::*;
