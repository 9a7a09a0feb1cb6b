use std::sync::Arc;

use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};

/// Wall-clock source. Everything that compares against "now" takes one of
/// these so ticks can be replayed in tests without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<OffsetDateTime>>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, at: OffsetDateTime) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn manual_clock_advances_shared_handles() {
        let clock = ManualClock::new(datetime!(2024-05-01 12:00 UTC));
        let handle = clock.clone();
        clock.advance(Duration::seconds(31));
        assert_eq!(handle.now(), datetime!(2024-05-01 12:00:31 UTC));
        handle.set(datetime!(2024-05-02 00:00 UTC));
        assert_eq!(clock.now(), datetime!(2024-05-02 00:00 UTC));
    }
}
