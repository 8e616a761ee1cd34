//! Watchdog thread for slow events.
//!
//! The simulation records the event it is dispatching and the mote it is
//! ticking in a shared [`WatchdogState`]. A separate thread samples it and
//! logs one alert per event that runs longer than the timeout. The watchdog
//! never interrupts the run.

use motesim_common::{MoteId, SimTime};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::warn;

/// The event being dispatched.
#[derive(Debug, Clone)]
pub struct CurrentEventInfo {
    /// Dispatch count, starting at 1.
    pub event_number: u64,
    /// Queue sequence number.
    pub sequence: u64,
    /// Event time.
    pub sim_time: SimTime,
    /// Action name.
    pub action: String,
    /// Mote being ticked or handled, if any.
    pub mote: Option<MoteId>,
    /// When dispatch started.
    pub started_at: Instant,
}

impl CurrentEventInfo {
    /// Info for an event that starts dispatching now.
    pub fn new(
        event_number: u64,
        sequence: u64,
        sim_time: SimTime,
        action: impl Into<String>,
    ) -> Self {
        CurrentEventInfo {
            event_number,
            sequence,
            sim_time,
            action: action.into(),
            mote: None,
            started_at: Instant::now(),
        }
    }
}

/// State shared between the simulation loop and the watchdog thread.
#[derive(Debug, Default)]
pub struct WatchdogState {
    current_event: Mutex<Option<CurrentEventInfo>>,
    stop_flag: AtomicBool,
    mote_names: Mutex<HashMap<MoteId, String>>,
    alert_count: AtomicU64,
    seed: AtomicU64,
}

impl WatchdogState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed shown in alerts.
    pub fn set_seed(&self, seed: u64) {
        self.seed.store(seed, Ordering::Relaxed);
    }

    /// Seed shown in alerts.
    pub fn seed(&self) -> u64 {
        self.seed.load(Ordering::Relaxed)
    }

    /// Register a display name for a mote.
    pub fn register_mote_name(&self, mote: MoteId, name: impl Into<String>) {
        self.mote_names.lock().insert(mote, name.into());
    }

    /// Display name for a mote.
    pub fn mote_name(&self, mote: MoteId) -> String {
        self.mote_names
            .lock()
            .get(&mote)
            .cloned()
            .unwrap_or_else(|| mote.to_string())
    }

    /// Set or clear the event being dispatched.
    pub fn set_current_event(&self, info: Option<CurrentEventInfo>) {
        *self.current_event.lock() = info;
    }

    /// Record which mote the current event is working on.
    pub fn set_current_mote(&self, mote: Option<MoteId>) {
        if let Some(info) = self.current_event.lock().as_mut() {
            info.mote = mote;
        }
    }

    /// The event being dispatched.
    pub fn current_event(&self) -> Option<CurrentEventInfo> {
        self.current_event.lock().clone()
    }

    /// Alerts fired so far.
    pub fn alert_count(&self) -> u64 {
        self.alert_count.load(Ordering::Relaxed)
    }

    fn stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }

    fn should_stop(&self) -> bool {
        self.stop_flag.load(Ordering::Relaxed)
    }

    fn increment_alert_count(&self) -> u64 {
        self.alert_count.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Watchdog thread handle.
pub struct Watchdog {
    state: Arc<WatchdogState>,
    thread_handle: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl Watchdog {
    /// Start a watchdog alerting on events slower than `timeout`.
    pub fn new(timeout: Duration) -> std::io::Result<Self> {
        let state = Arc::new(WatchdogState::new());
        let watchdog_state = Arc::clone(&state);
        let check_interval =
            (timeout / 2).clamp(Duration::from_millis(5), Duration::from_millis(500));

        let thread_handle = thread::Builder::new()
            .name("motesim-watchdog".to_string())
            .spawn(move || {
                let mut last_alerted_event: Option<u64> = None;
                while !watchdog_state.should_stop() {
                    thread::park_timeout(check_interval);
                    let Some(info) = watchdog_state.current_event() else {
                        continue;
                    };
                    let elapsed = info.started_at.elapsed();
                    if elapsed < timeout || last_alerted_event == Some(info.event_number) {
                        continue;
                    }
                    last_alerted_event = Some(info.event_number);
                    report(&watchdog_state, &info, elapsed);
                }
            })?;

        Ok(Watchdog {
            state,
            thread_handle: Some(thread_handle),
            timeout,
        })
    }

    /// State for the simulation loop to update.
    pub fn state(&self) -> &Arc<WatchdogState> {
        &self.state
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Stop the thread and wait for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.state.stop();
        if let Some(handle) = self.thread_handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn report(state: &WatchdogState, info: &CurrentEventInfo, elapsed: Duration) {
    let alert = state.increment_alert_count();
    let mote = info
        .mote
        .map(|m| format!("{} ({})", state.mote_name(m), m))
        .unwrap_or_else(|| "-".to_string());
    warn!(
        "WATCHDOG ALERT #{}: event taking too long ({:.1}s)\n  \
         event number: {}\n  \
         sequence:     {}\n  \
         action:       {}\n  \
         sim time:     {}\n  \
         mote:         {}\n  \
         re-run with --seed {} to reproduce",
        alert,
        elapsed.as_secs_f64(),
        info.event_number,
        info.sequence,
        info.action,
        info.sim_time,
        mote,
        state.seed()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alerts_once_per_slow_event() {
        let watchdog = Watchdog::new(Duration::from_millis(20)).unwrap();
        let state = Arc::clone(watchdog.state());
        state.register_mote_name(MoteId::new(3), "sender");
        state.set_current_event(Some(CurrentEventInfo::new(1, 0, SimTime::ZERO, "fine_sweep")));
        state.set_current_mote(Some(MoteId::new(3)));

        thread::sleep(Duration::from_millis(200));
        assert_eq!(state.alert_count(), 1);

        state.set_current_event(None);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(state.alert_count(), 1);
        watchdog.stop();
    }

    #[test]
    fn test_fast_events_do_not_alert() {
        let watchdog = Watchdog::new(Duration::from_secs(10)).unwrap();
        let state = Arc::clone(watchdog.state());
        for n in 1..=5 {
            state.set_current_event(Some(CurrentEventInfo::new(
                n,
                n,
                SimTime::from_millis(n),
                "coarse_tick",
            )));
        }
        state.set_current_event(None);
        assert_eq!(state.alert_count(), 0);
        assert_eq!(state.mote_name(MoteId::new(9)), "mote:9");
    }
}
