use std::collections::HashMap;

use fusex_common::wire::MountKind;
use fusex_common::{AuthId, Timestamp};

/// Mutable per-client record keyed by `ClientId` (spec.md §3 "Client
/// session").
#[derive(Clone, Debug)]
pub struct ClientSession {
    pub heartbeat: HeartbeatState,
    pub statistics: ClientStatistics,
    pub state: crate::state::ClientState,
    pub last_ops_time: u64,
}

impl ClientSession {
    pub fn new(heartbeat: HeartbeatState, now: Timestamp) -> Self {
        Self {
            heartbeat,
            statistics: ClientStatistics::default(),
            state: crate::state::ClientState::Online,
            last_ops_time: now.sec,
        }
    }

    pub fn heartbeat_age_secs(&self, now: Timestamp) -> u64 {
        now.elapsed_secs_since(self.heartbeat.last_heartbeat)
    }
}

#[derive(Clone, Debug)]
pub struct HeartbeatState {
    pub version: String,
    pub host: String,
    pub uuid: fusex_common::ClientUuid,
    pub pid: u32,
    pub start_time: Timestamp,
    pub last_heartbeat: Timestamp,
    pub lease_time_secs: Option<u64>,
    pub shutdown: bool,
    pub mount_kind: MountKind,
    pub protocol_version: String,
    pub revoke: HashMap<AuthId, fusex_common::wire::RevokeRequest>,
    pub log_payload: Option<String>,
    pub trace_payload: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ClientStatistics {
    pub resident_memory_bytes: u64,
    pub virtual_memory_bytes: u64,
    pub open_files: u64,
    pub inode_counter: u64,
    pub io_read_rate: f64,
    pub io_write_rate: f64,
    pub xoff_count: u64,
    pub no_buffer_count: u64,
    pub ops_count: u64,
    pub blocked_in_mutex_count: u64,
}
