//! Per-dispatch context handed to motes, radios and the medium.
//!
//! Motes never touch the event queue directly. They record timer requests
//! and radio notifications in a [`SimContext`], which the simulation drains
//! after the call returns.

use crate::{MoteId, RadioNotification, SimTime};

/// Timers a mote or its radio can arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Check whether an outbound byte transmission went quiet.
    TransmitInactivity,
    /// Feed a buffered inbound frame to a chip that just became ready.
    BufferedDelivery {
        /// Token the delivery belongs to.
        token: u64,
    },
    /// Drop a buffered inbound frame that was never consumed.
    DeliveryExpiry {
        /// Token the expiry belongs to.
        token: u64,
    },
    /// End of a packet-level transmission.
    TransmissionEnd,
    /// Firmware-defined timer.
    Firmware(u64),
}

/// A timer to enqueue once the current call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRequest {
    /// Mote the timer is delivered to.
    pub mote: MoteId,
    /// Which timer.
    pub timer: TimerKind,
    /// When it fires.
    pub at: SimTime,
}

/// Output collected while a mote, radio or the medium runs.
#[derive(Debug)]
pub struct SimContext {
    now: SimTime,
    timers: Vec<TimerRequest>,
    notifications: Vec<RadioNotification>,
}

impl SimContext {
    /// Create a context for the given simulation time.
    pub fn new(now: SimTime) -> Self {
        SimContext {
            now,
            timers: Vec::new(),
            notifications: Vec::new(),
        }
    }

    /// Current simulation time.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Arm a timer for `mote` at `at`.
    pub fn schedule_timer(&mut self, mote: MoteId, timer: TimerKind, at: SimTime) {
        self.timers.push(TimerRequest { mote, timer, at });
    }

    /// Arm a timer `delay_ms` after now.
    pub fn schedule_in(&mut self, mote: MoteId, timer: TimerKind, delay_ms: u64) {
        let at = self.now + delay_ms;
        self.schedule_timer(mote, timer, at);
    }

    /// Publish a radio notification.
    pub fn notify(&mut self, notification: RadioNotification) {
        self.notifications.push(notification);
    }

    /// Take the timer requests collected so far.
    pub fn take_timers(&mut self) -> Vec<TimerRequest> {
        std::mem::take(&mut self.timers)
    }

    /// Take the notifications collected so far.
    pub fn take_notifications(&mut self) -> Vec<RadioNotification> {
        std::mem::take(&mut self.notifications)
    }

    /// Notifications collected so far.
    pub fn notifications(&self) -> &[RadioNotification] {
        &self.notifications
    }

    /// Timer requests collected so far.
    pub fn timers(&self) -> &[TimerRequest] {
        &self.timers
    }

    /// Whether nothing has been collected.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty() && self.notifications.is_empty()
    }
}
