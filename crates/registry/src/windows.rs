use derive_builder::Builder;
use getset::{CopyGetters, Getters};

/// The heartbeat-monitor timing knobs (spec.md §6 "Configuration surface").
/// Defaults mirror the source's own fallback constants.
#[derive(Builder, Clone, CopyGetters, Debug, Getters)]
#[builder(default, pattern = "owned", setter(into))]
pub struct HeartbeatWindows {
    #[getset(get_copy = "pub")]
    heartbeat_interval_secs: u64,
    #[getset(get_copy = "pub")]
    heartbeat_window_secs: u64,
    #[getset(get_copy = "pub")]
    heartbeat_offline_window_secs: u64,
    #[getset(get_copy = "pub")]
    heartbeat_remove_window_secs: u64,
    #[getset(get_copy = "pub")]
    quota_check_interval_ticks: u32,
    #[getset(get = "pub")]
    min_protocol_version: String,
}

impl Default for HeartbeatWindows {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 10,
            heartbeat_window_secs: 30,
            heartbeat_offline_window_secs: 130,
            heartbeat_remove_window_secs: 86_400,
            quota_check_interval_ticks: 60,
            min_protocol_version: "4.0.0".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let w = HeartbeatWindowsBuilder::default()
            .heartbeat_window_secs(5u64)
            .build()
            .unwrap();
        assert_eq!(w.heartbeat_window_secs(), 5);
        assert_eq!(w.heartbeat_offline_window_secs(), 130);
    }
}
