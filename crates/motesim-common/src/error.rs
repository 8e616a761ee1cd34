//! Error types for the simulation core.

use crate::{MoteId, SimTime};
use motesim_frame::FrameError;
use thiserror::Error;

/// Errors that stop a simulation run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    /// An event was scheduled before the current simulation time.
    #[error("Scheduling violation: event at {requested} scheduled at {now}")]
    SchedulingViolation {
        /// Requested event time.
        requested: SimTime,
        /// Simulation time when the request was made.
        now: SimTime,
    },

    /// A mote failed while being ticked.
    #[error("Mote {mote} faulted at {time}: {message}")]
    MoteTickFault {
        /// The faulting mote.
        mote: MoteId,
        /// Simulation time of the fault.
        time: SimTime,
        /// Error or panic message.
        message: String,
    },

    /// No mote with this ID is part of the simulation.
    #[error("Unknown mote: {0}")]
    UnknownMote(MoteId),

    /// A mote with this ID is already part of the simulation.
    #[error("Duplicate mote: {0}")]
    DuplicateMote(MoteId),
}

impl SimError {
    /// Create a tick fault error.
    pub fn tick_fault(mote: MoteId, time: SimTime, message: impl Into<String>) -> Self {
        SimError::MoteTickFault {
            mote,
            time,
            message: message.into(),
        }
    }
}

/// Errors raised by a radio.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    /// Packet with no payload.
    #[error("Packet has no payload")]
    EmptyPacket,

    /// The radio is already transmitting.
    #[error("Radio is busy transmitting")]
    Busy,

    /// The radio is interfered and cannot accept a packet.
    #[error("Radio is interfered")]
    Interfered,

    /// Frame could not be built or parsed.
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Errors raised by a mote during a tick or timer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MoteError {
    /// Radio error.
    #[error("Radio error: {0}")]
    Radio(#[from] RadioError),

    /// Firmware or emulator fault.
    #[error("Firmware fault: {0}")]
    Firmware(String),
}

impl MoteError {
    /// Create a firmware fault.
    pub fn firmware(message: impl Into<String>) -> Self {
        MoteError::Firmware(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimError::SchedulingViolation {
            requested: SimTime::from_millis(3),
            now: SimTime::from_millis(5),
        };
        assert_eq!(err.to_string(), "Scheduling violation: event at 3ms scheduled at 5ms");

        let err = SimError::tick_fault(MoteId::new(2), SimTime::from_millis(9), "boom");
        assert!(err.to_string().contains("mote:2"));

        let err: MoteError = RadioError::from(FrameError::NoChecksum).into();
        assert!(err.to_string().contains("checksum"));
    }
}
