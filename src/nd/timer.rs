//! One-shot timer service
//!
//! Every timer is identified by an ID. Scheduling a timer replaces any
//! previous timer with the same ID, so a timer can never fire twice for a
//! single arming. Expired timers are handed back to the owner one at a
//! time, in deadline order, and the owner dispatches them under its own
//! `&mut self`. Nothing here runs callbacks.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Latest deadline handed out. Longer delays are clamped to it.
pub const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `now + after`, clamped so that huge delays never overflow `Instant`.
pub fn deadline_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after.min(FAR_FUTURE)).unwrap_or(now)
}

/// Deadline-ordered set of one-shot timers.
///
/// Backed by a min-heap of `(deadline, generation, id)` plus a map from ID
/// to its live `(deadline, generation)`. Rescheduling or cancelling leaves
/// the old heap node in place; it is discarded lazily when it reaches the
/// top and its generation no longer matches the map.
#[derive(Debug)]
pub struct TimerWheel<Id> {
    heap: BinaryHeap<Reverse<(Instant, u64, Id)>>,
    armed: HashMap<Id, (Instant, u64)>,
    generation: u64,
}

impl<Id: Clone + Eq + Hash + Ord> TimerWheel<Id> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            armed: HashMap::new(),
            generation: 0,
        }
    }

    /// Schedules `id` to fire `after` from `now`.
    ///
    /// Returns the previous deadline if the timer was already armed.
    pub fn schedule(&mut self, now: Instant, after: Duration, id: Id) -> Option<Instant> {
        self.schedule_at(deadline_after(now, after), id)
    }

    /// Schedules `id` to fire at `deadline`, replacing any earlier arming.
    pub fn schedule_at(&mut self, deadline: Instant, id: Id) -> Option<Instant> {
        self.generation += 1;
        let generation = self.generation;
        self.heap.push(Reverse((deadline, generation, id.clone())));
        self.armed
            .insert(id, (deadline, generation))
            .map(|(old, _)| old)
    }

    /// Cancels `id`. Returns the deadline it was scheduled for, if any.
    pub fn cancel(&mut self, id: &Id) -> Option<Instant> {
        self.armed.remove(id).map(|(deadline, _)| deadline)
    }

    /// Cancels every timer for which `f` returns true.
    pub fn cancel_with<F: FnMut(&Id) -> bool>(&mut self, mut f: F) {
        self.armed.retain(|id, _| !f(id));
    }

    /// The instant `id` will fire at, if armed.
    pub fn deadline(&self, id: &Id) -> Option<Instant> {
        self.armed.get(id).map(|(deadline, _)| *deadline)
    }

    pub fn is_armed(&self, id: &Id) -> bool {
        self.armed.contains_key(id)
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.discard_stale();
        self.heap.peek().map(|Reverse((deadline, _, _))| *deadline)
    }

    /// Removes and returns the earliest timer whose deadline is `<= now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<Id> {
        self.discard_stale();
        match self.heap.peek() {
            Some(Reverse((deadline, _, _))) if *deadline <= now => {}
            _ => return None,
        }
        let Reverse((_, _, id)) = self.heap.pop()?;
        self.armed.remove(&id);
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    fn discard_stale(&mut self) {
        while let Some(Reverse((_, generation, id))) = self.heap.peek() {
            match self.armed.get(id) {
                Some((_, live)) if live == generation => break,
                _ => {
                    self.heap.pop();
                }
            }
        }
    }
}

impl<Id: Clone + Eq + Hash + Ord> Default for TimerWheel<Id> {
    fn default() -> Self {
        Self::new()
    }
}
