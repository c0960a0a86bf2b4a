//! Explicit debounce timer.
//!
//! A `Debounce` is only a deadline. The owner decides what "firing" means:
//! it calls `fire(now)` from its own loop and runs the action when that
//! returns `true`. Rescheduling replaces the deadline, so only the last call
//! inside the window survives.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Debounce {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// (Re)start the window at `now`.
    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    /// Consume the deadline if it has passed.
    pub fn fire(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.deadline = None;
            true
        } else {
            false
        }
    }
}

/// Earliest of a set of optional deadlines.
pub fn earliest<I>(deadlines: I) -> Option<Instant>
where
    I: IntoIterator<Item = Option<Instant>>,
{
    deadlines.into_iter().flatten().min()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reschedule_pushes_deadline() {
        let t0 = Instant::now();
        let mut d = Debounce::new(Duration::from_millis(300));
        d.schedule(t0);
        d.schedule(t0 + Duration::from_millis(200));
        assert!(!d.fire(t0 + Duration::from_millis(350)));
        assert!(d.fire(t0 + Duration::from_millis(500)));
        assert!(!d.is_pending());
        assert!(!d.fire(t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_cancel() {
        let t0 = Instant::now();
        let mut d = Debounce::new(Duration::from_millis(100));
        d.schedule(t0);
        d.cancel();
        assert!(!d.fire(t0 + Duration::from_secs(1)));
    }

    #[test]
    fn test_earliest() {
        let t0 = Instant::now();
        let later = t0 + Duration::from_secs(1);
        assert_eq!(earliest([None, Some(later), Some(t0)]), Some(t0));
        assert_eq!(earliest([None, None]), None);
    }
}
