//! Clock implementations

use chrono::{DateTime, Utc};

use crate::domain::Clock;

/// Wall clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(any(test, feature = "test-helpers"))]
pub use mock::MockClock;

#[cfg(any(test, feature = "test-helpers"))]
mod mock {
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, TimeDelta, Utc};

    use crate::domain::Clock;

    /// Clock whose time only moves when a test moves it
    ///
    /// Clones share the same underlying time value.
    #[derive(Debug, Clone)]
    pub struct MockClock {
        current_time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl MockClock {
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                current_time: Arc::new(Mutex::new(start)),
            }
        }

        /// Start at a fixed, minute-aligned instant
        pub fn at_epoch_offset(seconds: i64) -> Self {
            Self::new(DateTime::from_timestamp(seconds, 0).unwrap_or_default())
        }

        pub fn advance(&self, delta: TimeDelta) {
            let mut time = self
                .current_time
                .lock()
                .expect("MockClock mutex poisoned - a test thread panicked while holding the lock");
            *time += delta;
        }

        pub fn set(&self, time: DateTime<Utc>) {
            let mut current = self
                .current_time
                .lock()
                .expect("MockClock mutex poisoned - a test thread panicked while holding the lock");
            *current = time;
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> DateTime<Utc> {
            *self
                .current_time
                .lock()
                .expect("MockClock mutex poisoned - a test thread panicked while holding the lock")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();

        assert!(second >= first);
    }

    #[test]
    fn test_mock_clock_advance_and_set() {
        let clock = MockClock::at_epoch_offset(1_700_000_040);
        let start = clock.now();

        clock.advance(TimeDelta::seconds(10));
        assert_eq!(clock.now(), start + TimeDelta::seconds(10));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_mock_clock_clones_share_time() {
        let clock = MockClock::at_epoch_offset(0);
        let other = clock.clone();

        other.advance(TimeDelta::minutes(5));
        assert_eq!(clock.now(), other.now());
    }
}
