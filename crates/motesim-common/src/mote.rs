//! Mote trait.

use crate::{MoteError, MoteId, Position, Radio, SimContext, TimerKind};
use serde::{Deserialize, Serialize};

/// How a mote is advanced by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoteKind {
    /// Ticked once per millisecond.
    Coarse,
    /// Cycle-accurate; ticked repeatedly within a millisecond until idle.
    Fine,
}

/// A simulated device.
pub trait Mote: Send {
    /// Unique ID.
    fn id(&self) -> MoteId;

    /// Scheduling class. Must not change while the mote is in a simulation.
    fn kind(&self) -> MoteKind;

    /// Optional display name.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Position used by distance-based connectivity.
    fn position(&self) -> Position {
        Position::default()
    }

    /// Advance the mote to `ctx.now()`.
    ///
    /// Fine motes return `true` while they still have work pending in the
    /// current millisecond. Coarse motes' return value is ignored.
    fn tick(&mut self, ctx: &mut SimContext) -> Result<bool, MoteError>;

    /// Handle a timer armed through the context.
    ///
    /// The default forwards non-firmware timers to the radio.
    fn on_timer(&mut self, timer: TimerKind, ctx: &mut SimContext) -> Result<(), MoteError> {
        match (timer, self.radio_mut()) {
            (TimerKind::Firmware(_), _) | (_, None) => Ok(()),
            (timer, Some(radio)) => radio.on_timer(timer, ctx),
        }
    }

    /// The mote's radio, if any.
    fn radio(&self) -> Option<&dyn Radio>;

    /// The mote's radio, if any.
    fn radio_mut(&mut self) -> Option<&mut dyn Radio>;

    /// Offset the mote's clock by `drift_ms` (negative delays startup).
    fn set_clock_drift(&mut self, _drift_ms: i64) {}
}
