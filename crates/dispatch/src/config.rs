//! Dispatcher-wide knobs threaded in from `crates/server`'s `Config`
//! (spec.md §6 "Configuration surface"). Kept separate from
//! `fusex_registry::HeartbeatWindows` because these are dispatch-local
//! (audience, listing, quota sweep), not heartbeat-timer specific.

use derive_builder::Builder;
use getset::{CopyGetters, Getters};

#[derive(Builder, Clone, CopyGetters, Debug, Getters)]
#[builder(default, pattern = "owned", setter(into))]
pub struct DispatchConfig {
    /// Hard cap on children returned by `LS`, absent an app-tag exemption
    /// (spec.md §4.4 "GET / LS").
    #[getset(get_copy = "pub")]
    max_children: usize,

    /// Broadcast audience size above which suppression-pattern filtering
    /// kicks in (spec.md §4.3 "Audience selection").
    #[getset(get_copy = "pub")]
    broadcast_max_audience: usize,

    #[getset(get = "pub")]
    broadcast_audience_suppress_match: Option<String>,

    /// How many CAP-monitor ticks between quota sweeps.
    #[getset(get_copy = "pub")]
    quota_check_interval_ticks: u32,

    /// Caps out-of-quota for longer than this are aged out even if still
    /// unexpired (spec.md §4.5 "CAP monitor").
    #[getset(get_copy = "pub")]
    quota_overage_grace_secs: u64,

    #[getset(get = "pub")]
    server_version: String,

    #[getset(get_copy = "pub")]
    hbrate_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_children: 131_072,
            broadcast_max_audience: 64,
            broadcast_audience_suppress_match: None,
            quota_check_interval_ticks: 60,
            quota_overage_grace_secs: 3600,
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            hbrate_secs: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let cfg = DispatchConfigBuilder::default()
            .max_children(16usize)
            .build()
            .unwrap();
        assert_eq!(cfg.max_children(), 16);
        assert_eq!(cfg.broadcast_max_audience(), 64);
    }
}
