use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Monotonic time source used to compute and wait for due-times
///
/// The drain loop reads `now` once per iteration and calls `sleep_until` only
/// when the earliest task is not yet due
pub trait Clock {
    /// Current point in time
    fn now(&self) -> Instant;

    /// Block the calling thread until `deadline` has passed
    fn sleep_until(&self, deadline: Instant);
}

/// Clock backed by [`Instant::now`]
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
    }
}

/// A clock that only moves when told to
///
/// Sleeping fast-forwards it to the deadline, so a drain completes instantly
/// while still observing due-time order. Clones share the same time
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Creates a clock frozen at the current instant
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
        }
    }

    /// Moves the clock forward
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }

    fn sleep_until(&self, deadline: Instant) {
        if deadline > self.now.get() {
            self.now.set(deadline);
        }
    }
}

#[cfg(test)]
mod test_clock {
    use super::*;

    #[test]
    fn test_manual_clock_fast_forwards() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.sleep_until(start + Duration::from_millis(5));
        assert_eq!(clock.now() - start, Duration::from_millis(5));

        // Never moves backwards
        clock.sleep_until(start);
        assert_eq!(clock.now() - start, Duration::from_millis(5));

        let shared = clock.clone();
        shared.advance(Duration::from_millis(1));
        assert_eq!(clock.now() - start, Duration::from_millis(6));
    }

    #[test]
    fn test_monotonic_clock_sleeps() {
        let clock = MonotonicClock;
        let deadline = clock.now() + Duration::from_millis(2);
        clock.sleep_until(deadline);
        assert!(clock.now() >= deadline);
    }
}
