//! Seconds + nanoseconds instants, as carried on the wire (`vtime`,
//! heartbeat clocks, mtime/ctime/btime).

use serde::{Deserialize, Serialize};
use std::ops::Add;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Timestamp {
    pub sec: u64,
    pub nsec: u32,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { sec: 0, nsec: 0 };

    pub fn new(sec: u64, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    /// Wall-clock snapshot, for the background monitors (spec.md §4.2
    /// "State machine", §4.5 "CAP monitor") — request handling never reads
    /// the clock directly, it always takes `now` as an argument.
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            sec: elapsed.as_secs(),
            nsec: elapsed.subsec_nanos(),
        }
    }

    pub fn saturating_sub_secs(self, secs: u64) -> Timestamp {
        Timestamp {
            sec: self.sec.saturating_sub(secs),
            nsec: self.nsec,
        }
    }

    /// Whole seconds between `earlier` and `self`, clamped to zero if
    /// `earlier` is actually later (clock skew, or a not-yet-seen session).
    pub fn elapsed_secs_since(self, earlier: Timestamp) -> u64 {
        self.sec.saturating_sub(earlier.sec)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        let total_nsec = self.nsec as u64 + rhs.subsec_nanos() as u64;
        Timestamp {
            sec: self.sec + rhs.as_secs() + total_nsec / 1_000_000_000,
            nsec: (total_nsec % 1_000_000_000) as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_duration_carries_seconds() {
        let t = Timestamp::new(10, 900_000_000) + Duration::from_millis(200);
        assert_eq!(t, Timestamp::new(11, 100_000_000));
    }

    #[test]
    fn elapsed_secs_since_clamps_on_clock_skew() {
        assert_eq!(Timestamp::new(100, 0).elapsed_secs_since(Timestamp::new(40, 0)), 60);
        assert_eq!(Timestamp::new(40, 0).elapsed_secs_since(Timestamp::new(100, 0)), 0);
    }
}
