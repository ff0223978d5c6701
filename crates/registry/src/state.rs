use strum::{AsRefStr, Display, EnumString};

/// A client session's position in the heartbeat-driven lifecycle (spec.md
/// §4.2 "State machine").
#[derive(AsRefStr, Clone, Copy, Debug, Display, EnumString, Eq, Hash, PartialEq)]
#[strum(serialize_all = "snake_case")]
pub enum ClientState {
    /// Heartbeats are arriving within `heartBeatWindow`.
    Online,

    /// No heartbeat for longer than `heartBeatWindow`, but within
    /// `heartBeatOfflineWindow`.
    Volatile,

    /// No heartbeat for longer than `heartBeatOfflineWindow`. Byte-range
    /// locks held by the client's UUID have been dropped.
    Offline,

    /// No heartbeat for longer than `heartBeatRemoveWindow`, the client
    /// sent a shutdown heartbeat, or its protocol version was rejected.
    /// A session in this state is removed from the registry on the same
    /// tick that discovers it.
    Evicted,
}

/// `<5m → "active"`, then widening buckets out to `>1w`, per spec.md §4.2
/// "Idle classification".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IdleBucket {
    Active,
    FiveMinutesToHour,
    HourToDay,
    DayToWeek,
    OverAWeek,
}

impl IdleBucket {
    pub fn classify(idle_secs: u64) -> Self {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 3600;
        const DAY: u64 = 86_400;
        const WEEK: u64 = 7 * DAY;
        match idle_secs {
            s if s < 5 * MINUTE => IdleBucket::Active,
            s if s < HOUR => IdleBucket::FiveMinutesToHour,
            s if s < DAY => IdleBucket::HourToDay,
            s if s < WEEK => IdleBucket::DayToWeek,
            _ => IdleBucket::OverAWeek,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            IdleBucket::Active => "active",
            IdleBucket::FiveMinutesToHour => "5m-1h",
            IdleBucket::HourToDay => "1h-1d",
            IdleBucket::DayToWeek => "1d-1w",
            IdleBucket::OverAWeek => ">1w",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_match_spec_boundaries() {
        assert_eq!(IdleBucket::classify(0), IdleBucket::Active);
        assert_eq!(IdleBucket::classify(299), IdleBucket::Active);
        assert_eq!(IdleBucket::classify(300), IdleBucket::FiveMinutesToHour);
        assert_eq!(IdleBucket::classify(3600), IdleBucket::HourToDay);
        assert_eq!(IdleBucket::classify(86_400), IdleBucket::DayToWeek);
        assert_eq!(IdleBucket::classify(7 * 86_400), IdleBucket::OverAWeek);
    }

    #[test]
    fn state_round_trips_through_wire_spelling() {
        assert_eq!(ClientState::Volatile.to_string(), "volatile");
        assert_eq!("evicted".parse::<ClientState>().unwrap(), ClientState::Evicted);
    }
}
