//! Time-ordered event queue.
//!
//! The queue is generic over the action type so that each runner can define
//! its own set of actions. Ordering is by `(time, sequence)`: earlier times
//! first, and events with the same time in insertion order.

use crate::{SimError, SimTime};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A scheduled action.
#[derive(Debug)]
pub struct Event<A> {
    /// When the action runs.
    pub time: SimTime,
    /// Insertion tag; breaks ties between equal times.
    pub sequence: u64,
    /// What to run.
    pub action: A,
}

/// Heap entry with reversed ordering so `BinaryHeap` pops the minimum.
struct Entry<A>(Event<A>);

impl<A> Entry<A> {
    fn key(&self) -> (SimTime, u64) {
        (self.0.time, self.0.sequence)
    }
}

impl<A> PartialEq for Entry<A> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<A> Eq for Entry<A> {}

impl<A> PartialOrd for Entry<A> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<A> Ord for Entry<A> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// Priority queue of events plus the current simulation time.
pub struct EventQueue<A> {
    heap: BinaryHeap<Entry<A>>,
    next_sequence: u64,
    now: SimTime,
}

impl<A> EventQueue<A> {
    /// Create an empty queue at time zero.
    pub fn new() -> Self {
        EventQueue {
            heap: BinaryHeap::new(),
            next_sequence: 0,
            now: SimTime::ZERO,
        }
    }

    /// Current simulation time: the time of the last popped event.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule an action. Times before the current time are rejected.
    ///
    /// Returns the sequence number assigned to the event.
    pub fn schedule(&mut self, action: A, time: SimTime) -> Result<u64, SimError> {
        if time < self.now {
            return Err(SimError::SchedulingViolation {
                requested: time,
                now: self.now,
            });
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Entry(Event {
            time,
            sequence,
            action,
        }));
        Ok(sequence)
    }

    /// Remove and return the earliest event, advancing the clock to its time.
    pub fn pop_earliest(&mut self) -> Option<Event<A>> {
        let Entry(event) = self.heap.pop()?;
        debug_assert!(event.time >= self.now);
        self.now = event.time;
        Some(event)
    }

    /// Time of the earliest event, if any.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|e| e.0.time)
    }

    /// Whether any queued action matches `pred`.
    pub fn contains(&self, mut pred: impl FnMut(&A) -> bool) -> bool {
        self.heap.iter().any(|e| pred(&e.0.action))
    }

    /// Drop every queued action for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(&A) -> bool) {
        self.heap.retain(|e| keep(&e.0.action));
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<A> Default for EventQueue<A> {
    fn default() -> Self {
        Self::new()
    }
}
