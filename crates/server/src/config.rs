//! Process-level configuration (spec.md §6 "Configuration knobs"), following
//! the teacher's `src/config.rs` pattern: a `clap`-derived, `derive_builder`+
//! `getset`-accessed struct, one env var or flag per knob.

use clap::{AppSettings, Clap};
use derive_builder::Builder;
use getset::{CopyGetters, Getters};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use fusex_dispatch::{DispatchConfig, DispatchConfigBuilder};
use fusex_registry::{HeartbeatWindows, HeartbeatWindowsBuilder};

#[derive(Builder, Clap, CopyGetters, Getters, Deserialize, Serialize)]
#[builder(default, pattern = "owned", setter(into))]
#[serde(rename_all = "kebab-case")]
#[clap(
    after_help("FuseX metadata server core"),
    global_setting(AppSettings::ColoredHelp)
)]
/// fusexd - the FuseX metadata server core
pub struct Config {
    #[get_copy = "pub"]
    #[clap(
        default_value("info"),
        env("FUSEXD_LOG_LEVEL"),
        long("log-level"),
        possible_values(&["trace", "debug", "info", "warn", "error", "off"]),
        short('l'),
        value_name("LEVEL")
    )]
    /// The logging level of the server process
    log_level: LevelFilter,

    #[get = "pub"]
    #[clap(
        default_value("0.0.0.0:1094"),
        env("FUSEXD_BIND_ADDR"),
        long("bind-addr")
    )]
    /// The TCP address the server listens on
    bind_addr: String,

    #[get_copy = "pub"]
    #[clap(default_value("131072"), env("MAX_CHILDREN"), long("max-children"))]
    /// Hard cap on a single LS response (spec.md §6)
    max_children: usize,

    #[get_copy = "pub"]
    #[clap(
        default_value("10"),
        env("heartBeatInterval"),
        long("heartbeat-interval-secs")
    )]
    /// Seconds between heartbeat-monitor ticks
    heartbeat_interval_secs: u64,

    #[get_copy = "pub"]
    #[clap(
        default_value("30"),
        env("heartBeatWindow"),
        long("heartbeat-window-secs")
    )]
    heartbeat_window_secs: u64,

    #[get_copy = "pub"]
    #[clap(
        default_value("130"),
        env("heartBeatOfflineWindow"),
        long("heartbeat-offline-window-secs")
    )]
    heartbeat_offline_window_secs: u64,

    #[get_copy = "pub"]
    #[clap(
        default_value("86400"),
        env("heartBeatRemoveWindow"),
        long("heartbeat-remove-window-secs")
    )]
    heartbeat_remove_window_secs: u64,

    #[get_copy = "pub"]
    #[clap(
        default_value("60"),
        env("QuotaCheckInterval"),
        long("quota-check-interval-ticks")
    )]
    /// Ticks between quota sweeps in the CAP monitor
    quota_check_interval_ticks: u32,

    #[get_copy = "pub"]
    #[clap(
        default_value("3600"),
        env("QuotaOverageGraceSecs"),
        long("quota-overage-grace-secs")
    )]
    quota_overage_grace_secs: u64,

    #[get_copy = "pub"]
    #[clap(
        default_value("64"),
        env("BroadCastMaxAudience"),
        long("broadcast-max-audience")
    )]
    broadcast_max_audience: usize,

    #[get = "pub"]
    #[clap(env("BroadCastAudienceSuppressMatch"), long("broadcast-audience-suppress-match"))]
    /// Regex that suppresses audience members once the audience exceeds
    /// `broadcast_max_audience` (spec.md §4.3 "Audience selection")
    broadcast_audience_suppress_match: Option<String>,

    #[get = "pub"]
    #[clap(
        default_value("4.0.0"),
        env("PROTOCOLV2"),
        long("min-protocol-version")
    )]
    min_protocol_version: String,

    #[get_copy = "pub"]
    #[clap(default_value("10"), env("FUSEXD_HBRATE"), long("hbrate-secs"))]
    /// The `hbrate` hint pushed in `CONFIG` (spec.md §4.2, §6)
    hbrate_secs: u64,

    #[get = "pub"]
    #[clap(long("server-version"))]
    server_version: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::parse()
    }
}

impl Config {
    pub fn heartbeat_windows(&self) -> HeartbeatWindows {
        HeartbeatWindowsBuilder::default()
            .heartbeat_interval_secs(self.heartbeat_interval_secs)
            .heartbeat_window_secs(self.heartbeat_window_secs)
            .heartbeat_offline_window_secs(self.heartbeat_offline_window_secs)
            .heartbeat_remove_window_secs(self.heartbeat_remove_window_secs)
            .quota_check_interval_ticks(self.quota_check_interval_ticks)
            .min_protocol_version(self.min_protocol_version.clone())
            .build()
            .expect("heartbeat windows builder has every field set")
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfigBuilder::default()
            .max_children(self.max_children)
            .broadcast_max_audience(self.broadcast_max_audience)
            .broadcast_audience_suppress_match(self.broadcast_audience_suppress_match.clone())
            .quota_check_interval_ticks(self.quota_check_interval_ticks)
            .quota_overage_grace_secs(self.quota_overage_grace_secs)
            .server_version(
                self.server_version
                    .clone()
                    .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            )
            .hbrate_secs(self.hbrate_secs)
            .build()
            .expect("dispatch config builder has every field set")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = Config::default();
        assert_eq!(c.log_level(), LevelFilter::Info);
        assert_eq!(c.max_children(), 131_072);
    }

    #[test]
    fn derives_heartbeat_windows() {
        let c = ConfigBuilder::default()
            .heartbeat_window_secs(5u64)
            .build()
            .unwrap();
        let windows = c.heartbeat_windows();
        assert_eq!(windows.heartbeat_window_secs(), 5);
        assert_eq!(windows.heartbeat_offline_window_secs(), 130);
    }

    #[test]
    fn derives_dispatch_config() {
        let c = ConfigBuilder::default().max_children(16usize).build().unwrap();
        let dispatch = c.dispatch_config();
        assert_eq!(dispatch.max_children(), 16);
        assert_eq!(dispatch.broadcast_max_audience(), 64);
    }
}
