//! The `setTimeout` queue
//!
//! Tasks are ordered by due-time, then by registration sequence, so equal
//! due-times fire in the order they were registered. The queue knows nothing
//! about the engine; the host stores callback handles as the payload
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

mod clock;
pub use clock::{Clock, ManualClock, MonotonicClock};

/// Largest delay honoured, in milliseconds
pub const MAX_DELAY_MILLIS: f64 = i32::MAX as f64;

/// Converts a script-provided delay into the delay actually used
///
/// NaN counts as 0, fractions are truncated, and the result is clamped to
/// `1..=i32::MAX` milliseconds
#[must_use]
pub fn effective_delay(after_millis: f64) -> Duration {
    let millis = if after_millis.is_nan() {
        0.0
    } else {
        after_millis.trunc()
    };

    let millis = millis.clamp(1.0, MAX_DELAY_MILLIS);
    Duration::from_millis(millis as u64)
}

/// Observable state of a [`DeferredQueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Nothing has ever been registered
    Empty,

    /// Tasks are waiting and no drain is running
    Pending(usize),

    /// A drain is in progress
    Draining,

    /// A drain has finished; nothing is waiting
    Idle,
}

/// One registered callback
#[derive(Debug)]
pub struct DeferredTask<T> {
    /// When the task becomes eligible to fire
    pub due: Instant,

    /// Registration order, used to break due-time ties
    pub sequence: u64,

    /// The callback and whatever else is needed to invoke it
    pub payload: T,
}

impl<T> PartialEq for DeferredTask<T> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.sequence == other.sequence
    }
}
impl<T> Eq for DeferredTask<T> {}

impl<T> PartialOrd for DeferredTask<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for DeferredTask<T> {
    // Reversed so the std max-heap pops the earliest task first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Result of asking the queue for work
#[derive(Debug)]
pub enum QueuePoll<T> {
    /// The earliest task is due; it has been removed from the queue
    Fire(DeferredTask<T>),

    /// The earliest task is due at the given instant
    Sleep(Instant),

    /// Nothing left to run
    Exhausted,
}

/// Min-heap of deferred tasks keyed by (due-time, registration sequence)
#[derive(Debug)]
pub struct DeferredQueue<T> {
    heap: BinaryHeap<DeferredTask<T>>,
    next_sequence: u64,
    draining: bool,
    drained: bool,
}

impl<T> Default for DeferredQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DeferredQueue<T> {
    /// Creates an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_sequence: 0,
            draining: false,
            drained: false,
        }
    }

    /// Schedules `payload` to fire `after_millis` after `now`
    ///
    /// Returns the registration sequence of the new task
    pub fn register(&mut self, now: Instant, after_millis: f64, payload: T) -> u64 {
        let delay = effective_delay(after_millis);
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        tracing::debug!(sequence, delay_ms = delay.as_millis() as u64, "deferred task registered");
        self.heap.push(DeferredTask {
            due: now + delay,
            sequence,
            payload,
        });

        sequence
    }

    /// Looks at the earliest task, removing it if it is due at `now`
    pub fn poll(&mut self, now: Instant) -> QueuePoll<T> {
        match self.heap.peek() {
            None => QueuePoll::Exhausted,
            Some(task) if task.due > now => QueuePoll::Sleep(task.due),
            Some(_) => match self.heap.pop() {
                Some(task) => QueuePoll::Fire(task),
                None => QueuePoll::Exhausted,
            },
        }
    }

    /// Marks the start of a drain
    pub fn begin_drain(&mut self) {
        tracing::debug!(pending = self.heap.len(), "deferred drain started");
        self.draining = true;
    }

    /// Marks the end of a drain; the queue becomes Idle once empty
    pub fn finish_drain(&mut self) {
        tracing::debug!(pending = self.heap.len(), "deferred drain finished");
        self.draining = false;
        self.drained = true;
    }

    /// Drops every waiting task, releasing their payloads
    ///
    /// Returns how many were dropped
    pub fn discard(&mut self) -> usize {
        let discarded = self.heap.len();
        self.heap.clear();
        if discarded > 0 {
            tracing::debug!(discarded, "deferred tasks discarded");
        }
        discarded
    }

    /// Number of waiting tasks
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True if no task is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Current state of the queue
    #[must_use]
    pub fn state(&self) -> QueueState {
        if self.draining {
            QueueState::Draining
        } else if !self.heap.is_empty() {
            QueueState::Pending(self.heap.len())
        } else if self.drained {
            QueueState::Idle
        } else {
            QueueState::Empty
        }
    }
}

#[cfg(test)]
mod test_deferred_queue {
    use super::*;
    use std::rc::Rc;

    /// Runs a drain to completion, collecting payloads in firing order
    fn drain_all<T>(queue: &mut DeferredQueue<T>, clock: &ManualClock) -> Vec<T> {
        let mut fired = vec![];
        queue.begin_drain();
        loop {
            match queue.poll(clock.now()) {
                QueuePoll::Fire(task) => fired.push(task.payload),
                QueuePoll::Sleep(due) => clock.sleep_until(due),
                QueuePoll::Exhausted => break,
            }
        }
        queue.finish_drain();
        fired
    }

    #[test]
    fn test_effective_delay() {
        assert_eq!(effective_delay(0.0), Duration::from_millis(1));
        assert_eq!(effective_delay(-50.0), Duration::from_millis(1));
        assert_eq!(effective_delay(f64::NAN), Duration::from_millis(1));
        assert_eq!(effective_delay(0.9), Duration::from_millis(1));
        assert_eq!(effective_delay(5.7), Duration::from_millis(5));
        assert_eq!(
            effective_delay(f64::INFINITY),
            Duration::from_millis(i32::MAX as u64)
        );
    }

    #[test]
    fn test_equal_delays_fire_in_registration_order() {
        let clock = ManualClock::new();
        let mut queue = DeferredQueue::new();
        for name in ["a", "b", "c", "d"] {
            queue.register(clock.now(), 10.0, name);
        }

        assert_eq!(drain_all(&mut queue, &clock), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_zero_and_one_are_ties() {
        let clock = ManualClock::new();
        let mut queue = DeferredQueue::new();
        queue.register(clock.now(), 1.0, "first");
        queue.register(clock.now(), 0.0, "second");
        queue.register(clock.now(), -3.0, "third");

        assert_eq!(
            drain_all(&mut queue, &clock),
            vec!["first", "second", "third"]
        );
    }

    #[test]
    fn test_earlier_due_fires_first() {
        let clock = ManualClock::new();
        let start = clock.now();
        let mut queue = DeferredQueue::new();
        queue.register(clock.now(), 5.0, "g");
        queue.register(clock.now(), 0.0, "f");

        assert_eq!(drain_all(&mut queue, &clock), vec!["f", "g"]);
        assert_eq!(clock.now() - start, Duration::from_millis(5));
    }

    #[test]
    fn test_poll_sleeps_until_due() {
        let clock = ManualClock::new();
        let mut queue = DeferredQueue::new();
        queue.register(clock.now(), 3.0, ());

        let due = match queue.poll(clock.now()) {
            QueuePoll::Sleep(due) => due,
            other => panic!("Expected a sleep, got {other:?}"),
        };
        assert_eq!(queue.len(), 1);

        clock.sleep_until(due);
        assert!(matches!(queue.poll(clock.now()), QueuePoll::Fire(_)));
        assert!(matches!(queue.poll(clock.now()), QueuePoll::Exhausted));
    }

    #[test]
    fn test_state_transitions() {
        let clock = ManualClock::new();
        let mut queue = DeferredQueue::new();
        assert_eq!(queue.state(), QueueState::Empty);

        queue.register(clock.now(), 1.0, ());
        queue.register(clock.now(), 1.0, ());
        assert_eq!(queue.state(), QueueState::Pending(2));

        queue.begin_drain();
        assert_eq!(queue.state(), QueueState::Draining);
        queue.finish_drain();
        assert_eq!(queue.state(), QueueState::Pending(2));

        drain_all(&mut queue, &clock);
        assert_eq!(queue.state(), QueueState::Idle);
        assert!(queue.is_empty());

        queue.register(clock.now(), 1.0, ());
        assert_eq!(queue.state(), QueueState::Pending(1));
    }

    #[test]
    fn test_registration_during_drain_is_honoured() {
        let clock = ManualClock::new();
        let mut queue = DeferredQueue::new();
        queue.register(clock.now(), 1.0, 0);

        let mut fired = vec![];
        queue.begin_drain();
        loop {
            match queue.poll(clock.now()) {
                QueuePoll::Fire(task) => {
                    fired.push(task.payload);
                    if task.payload < 3 {
                        queue.register(clock.now(), 2.0, task.payload + 1);
                    }
                }
                QueuePoll::Sleep(due) => clock.sleep_until(due),
                QueuePoll::Exhausted => break,
            }
        }
        queue.finish_drain();

        assert_eq!(fired, vec![0, 1, 2, 3]);
        assert_eq!(queue.state(), QueueState::Idle);
    }

    #[test]
    fn test_discard_releases_payloads() {
        let clock = ManualClock::new();
        let callback = Rc::new(());
        let mut queue = DeferredQueue::new();
        queue.register(clock.now(), 1.0, callback.clone());
        queue.register(clock.now(), 2.0, callback.clone());
        assert_eq!(Rc::strong_count(&callback), 3);

        queue.begin_drain();
        assert_eq!(queue.discard(), 2);
        queue.finish_drain();

        assert_eq!(Rc::strong_count(&callback), 1);
        assert_eq!(queue.state(), QueueState::Idle);
    }

    #[test]
    fn test_sequences_are_unique() {
        let clock = ManualClock::new();
        let mut queue = DeferredQueue::new();
        let a = queue.register(clock.now(), 1.0, ());
        queue.discard();
        let b = queue.register(clock.now(), 1.0, ());
        assert!(b > a);
    }
}
