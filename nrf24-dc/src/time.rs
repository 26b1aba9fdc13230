//! Time source and deadline arithmetic.
//!
//! Every blocking wait in the engine is bounded by a [Deadline] computed once when a
//! phase starts, then checked again before each call into the radio. Waits are always
//! derived from what is left on the deadline, never from a fresh timeout, so retries
//! cannot stretch a phase past its budget.
use std::time::{Duration, Instant};

/// Monotonic time source used by the transport and the engine.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [Instant::now].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Absolute point in time after which a phase must stop waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(now: Instant, budget: Duration) -> Self {
        Deadline(now + budget)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.0.saturating_duration_since(now)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.0
    }

    /// The earliest of two deadlines.
    pub fn earliest(self, other: Deadline) -> Deadline {
        if other.0 < self.0 {
            other
        } else {
            self
        }
    }

    /// A deadline `window` from now that never goes past `self`.
    pub fn window(&self, now: Instant, window: Duration) -> Deadline {
        self.earliest(Deadline::after(now, window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_saturates_at_zero() {
        let start = Instant::now();
        let deadline = Deadline::after(start, Duration::from_millis(10));
        assert_eq!(deadline.remaining(start), Duration::from_millis(10));
        assert_eq!(
            deadline.remaining(start + Duration::from_millis(25)),
            Duration::ZERO
        );
        assert!(deadline.is_expired(start + Duration::from_millis(10)));
        assert!(!deadline.is_expired(start + Duration::from_millis(9)));
    }

    #[test]
    fn window_never_exceeds_parent() {
        let start = Instant::now();
        let phase = Deadline::after(start, Duration::from_millis(5));
        let wide = phase.window(start, Duration::from_millis(50));
        assert_eq!(wide, phase);
        let narrow = phase.window(start, Duration::from_millis(2));
        assert_eq!(narrow.instant(), start + Duration::from_millis(2));
    }

    #[test]
    fn earliest_picks_the_closest() {
        let start = Instant::now();
        let near = Deadline::after(start, Duration::from_millis(1));
        let far = Deadline::after(start, Duration::from_millis(3));
        assert_eq!(near.earliest(far), near);
        assert_eq!(far.earliest(near), near);
        // Borrowed receivers go through the same method.
        let window = &far;
        assert_eq!(window.window(start, Duration::from_millis(1)), near);
    }
}
