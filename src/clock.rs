use std::cell::Cell;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, Utc};

/// UTC offset of the lab the logger was written for (Asia/Jakarta).
pub const DEFAULT_UTC_OFFSET_SECS: i32 = 7 * 3600;

/// Timezone-aware wall clock plus the blocking sleep used between polls.
pub trait Clock {
    fn now(&self) -> DateTime<FixedOffset>;

    fn sleep(&self, duration: Duration);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> DateTime<FixedOffset> {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        let offset = FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECS)
            .unwrap_or_else(|| Utc.fix());
        Self::new(offset)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Simulated time: `sleep` advances the clock instead of blocking.
#[derive(Debug)]
pub struct ManualClock {
    now: Cell<DateTime<FixedOffset>>,
    slept: Cell<Duration>,
}

impl ManualClock {
    pub fn starting_at(start: DateTime<FixedOffset>) -> Self {
        Self {
            now: Cell::new(start),
            slept: Cell::new(Duration::ZERO),
        }
    }

    /// Move time forward. Saturates at the latest representable instant.
    pub fn advance(&self, duration: Duration) {
        let now = self.now.get();
        let next = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|step| now.checked_add_signed(step))
            .unwrap_or_else(|| DateTime::<Utc>::MAX_UTC.fixed_offset());
        self.now.set(next);
    }

    /// Total time spent in `sleep`.
    pub fn slept(&self) -> Duration {
        self.slept.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.slept.set(self.slept.get() + duration);
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances_on_sleep() {
        let start = DateTime::parse_from_rfc3339("2024-03-01T10:00:00+07:00").unwrap();
        let clock = ManualClock::starting_at(start);
        clock.sleep(Duration::from_millis(1500));
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now(), start + chrono::Duration::milliseconds(2500));
        assert_eq!(clock.slept(), Duration::from_millis(1500));
    }

    #[test]
    fn test_manual_clock_saturates() {
        let start = DateTime::parse_from_rfc3339("2024-03-01T10:00:00+07:00").unwrap();
        let clock = ManualClock::starting_at(start);
        clock.advance(Duration::MAX);
        assert_eq!(clock.now(), DateTime::<Utc>::MAX_UTC);
        clock.sleep(Duration::from_secs(1));
        assert_eq!(clock.now(), DateTime::<Utc>::MAX_UTC);
        assert_eq!(clock.slept(), Duration::from_secs(1));
    }

    #[test]
    fn test_system_clock_uses_offset() {
        let clock = SystemClock::default();
        assert_eq!(clock.now().offset().local_minus_utc(), DEFAULT_UTC_OFFSET_SECS);
    }
}
