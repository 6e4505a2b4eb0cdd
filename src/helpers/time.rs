use chrono::{DateTime, Utc};

/// Source of wall-clock time for timestamping published measurements.
///
/// Line-protocol timestamps are meaningless without one, so the publisher
/// takes a clock at construction rather than treating time as optional.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    fn epoch_seconds(&self) -> i64 {
        self.now().timestamp()
    }
}

/// The system wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
