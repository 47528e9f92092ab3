//! Time source used by every wait loop in the crate.
//!
//! Acknowledgment waits poll the port until a deadline passes. Routing
//! `now`/`sleep` through a trait lets tests drive those deadlines without
//! real sleeping.

use std::thread;
use std::time::{Duration, Instant};

/// Monotonic and wall-clock time source.
pub trait Clock {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Block the current thread for `duration`.
    fn sleep(&self, duration: Duration);

    /// Seconds since the Unix epoch.
    fn unix_time(&self) -> i64;
}

/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }

    fn unix_time(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Deadline helper for bounded polling loops.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    expires: Instant,
}

impl Deadline {
    pub(crate) fn after<C: Clock + ?Sized>(clock: &C, timeout: Duration) -> Self {
        Self {
            expires: clock.now() + timeout,
        }
    }

    pub(crate) fn is_expired<C: Clock + ?Sized>(&self, clock: &C) -> bool {
        clock.now() >= self.expires
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeClock;
    use super::*;

    #[test]
    fn test_deadline_expires_after_sleeping_past_it() {
        let clock = FakeClock::new();
        let deadline = Deadline::after(&clock, Duration::from_secs(2));
        assert!(!deadline.is_expired(&clock));

        clock.sleep(Duration::from_millis(1999));
        assert!(!deadline.is_expired(&clock));

        clock.sleep(Duration::from_millis(1));
        assert!(deadline.is_expired(&clock));
    }

    #[test]
    fn test_system_clock_unix_time_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.unix_time() > 1_577_836_800);
    }
}
