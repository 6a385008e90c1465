//! Source of wall-clock time used by stores to stamp records.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// A source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// [Clock] implementation that reads the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<T> Clock for Arc<T>
where
    T: Clock + ?Sized,
{
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Manually-driven [Clock], useful in tests to assert on timestamps.
///
/// Cloned instances share the same time.
#[derive(Debug, Clone)]
pub struct Manual {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl Manual {
    /// Creates a new [Manual] clock starting at the given time.
    #[must_use]
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    /// Moves the clock by the given amount of time, which can also be negative.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Sets the clock to a specific time.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for Manual {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Returns the timestamp to record on a committed update: the clock
/// time, unless the clock went backwards since the previous update.
#[must_use]
pub fn next_update_time(clock: &impl Clock, previous: DateTime<Utc>) -> DateTime<Utc> {
    clock.now().max(previous)
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Manual::starting_at(start);
        let other = clock.clone();

        clock.advance(Duration::seconds(5));

        assert_eq!(start + Duration::seconds(5), other.now());
    }

    #[test]
    fn next_update_time_never_goes_backwards() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Manual::starting_at(start);

        let previous = start + Duration::minutes(1);
        assert_eq!(previous, next_update_time(&clock, previous));

        clock.advance(Duration::minutes(2));
        assert_eq!(clock.now(), next_update_time(&clock, previous));
    }
}
