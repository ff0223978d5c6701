//! The client registry: heartbeat-driven lifecycle of client sessions,
//! eviction, lock cleanup, per-client statistics, and broadcast-audience
//! bookkeeping (spec.md §4.2).
//!
//! Mirrors [`fusex_capstore::store::CapStore`]'s single-lock-over-several-
//! indices shape: everything here is small, mutated often, and explicitly
//! kept off the RCU path (spec.md §5's "registry/CAP store should not use
//! RCU" guidance).

pub mod session;
pub mod state;
pub mod windows;

pub use session::{ClientSession, ClientStatistics, HeartbeatState};
pub use state::{ClientState, IdleBucket};
pub use windows::{HeartbeatWindows, HeartbeatWindowsBuilder};

use std::collections::HashMap;
use std::sync::RwLock;

use fusex_common::wire::{Heartbeat, MountKind};
use fusex_common::{compare_versions, AuthId, ClientId, ClientUuid, Timestamp};
use std::cmp::Ordering;

#[derive(Debug, Default)]
struct Clients {
    by_id: HashMap<ClientId, ClientSession>,
    /// `ClientUUID → ClientId`, most-recent registration wins (spec.md §3
    /// "Client UUID view").
    ids_by_uuid: HashMap<ClientUuid, ClientId>,
}

/// What the caller must do after `Dispatch` returns, outside the registry
/// lock (spec.md §4.2 steps 2, 6, 7).
#[derive(Clone, Debug, Default)]
pub struct DispatchOutcome {
    pub dropped_stale_heartbeat: bool,
    pub first_mount: bool,
    pub revoke: Vec<AuthId>,
    pub version_mismatch: Option<String>,
    pub log_payload: Option<Vec<u8>>,
    pub trace_payload: Option<Vec<u8>>,
}

impl DispatchOutcome {
    fn dropped() -> Self {
        Self {
            dropped_stale_heartbeat: true,
            ..Default::default()
        }
    }
}

/// A client that crossed a state-machine edge on this tick, plus what the
/// caller must do as a consequence (spec.md §4.2 "State machine").
#[derive(Clone, Debug)]
pub struct Transition {
    pub clientid: ClientId,
    pub uuid: ClientUuid,
    pub from: ClientState,
    pub to: ClientState,
}

#[derive(Clone, Debug, Default)]
pub struct TickOutcome {
    pub transitions: Vec<Transition>,
    /// UUIDs whose byte-range locks must be dropped (VOLATILE→OFFLINE and
    /// OFFLINE→EVICTED edges; deduplicated per spec.md's "dropped exactly
    /// once").
    pub drop_locks_for: Vec<ClientUuid>,
    /// Clients erased from the registry this tick (OFFLINE→EVICTED, or a
    /// shutdown-flagged heartbeat).
    pub evicted: Vec<ClientId>,
}

#[derive(Clone, Debug, Default)]
pub struct EvictOutcome {
    pub evicted: Vec<ClientId>,
    pub drop_locks_for: Vec<ClientUuid>,
    pub found: bool,
}

/// A `uuid` argument to [`ClientRegistry::evict`] that names a predicate
/// class instead of one client (spec.md §4.2 `Evict(uuid, reason)`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EvictTarget<'a> {
    ClientUuid(&'a ClientUuid),
    StaticByPredicate,
    AutofsByPredicate,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EvictPredicate {
    MemoryAtLeastMb(u64),
    IdleAtLeastSecs(u64),
}

impl EvictPredicate {
    /// Parses `mem:<MB>` / `idle:<seconds>` (spec.md §4.2 `Evict`).
    pub fn parse(reason: &str) -> Option<Self> {
        let (kind, value) = reason.split_once(':')?;
        let value: u64 = value.parse().ok()?;
        match kind {
            "mem" => Some(EvictPredicate::MemoryAtLeastMb(value)),
            "idle" => Some(EvictPredicate::IdleAtLeastSecs(value)),
            _ => None,
        }
    }

    fn matches(self, session: &ClientSession, now: Timestamp) -> bool {
        match self {
            EvictPredicate::MemoryAtLeastMb(mb) => {
                session.statistics.resident_memory_bytes >= mb * 1024 * 1024
            }
            EvictPredicate::IdleAtLeastSecs(secs) => {
                now.elapsed_secs_since(Timestamp::new(session.last_ops_time, 0)) >= secs
            }
        }
    }
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<Clients>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.clients.read().expect("registry lock").by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clientid_for_uuid(&self, uuid: &ClientUuid) -> Option<ClientId> {
        self.clients
            .read()
            .expect("registry lock")
            .ids_by_uuid
            .get(uuid)
            .cloned()
    }

    pub fn session(&self, clientid: &ClientId) -> Option<ClientSession> {
        self.clients
            .read()
            .expect("registry lock")
            .by_id
            .get(clientid)
            .cloned()
    }

    /// spec.md §4.2 "Heartbeat ingestion". `offline_window_secs` and
    /// `min_protocol_version` come from [`HeartbeatWindows`]; passed
    /// explicitly so callers can snapshot one `windows` value per tick.
    pub fn dispatch(
        &self,
        clientid: ClientId,
        hb: Heartbeat,
        now: Timestamp,
        offline_window_secs: u64,
        min_protocol_version: &str,
    ) -> DispatchOutcome {
        if now.elapsed_secs_since(hb.clock) > offline_window_secs {
            return DispatchOutcome::dropped();
        }

        let mut outcome = DispatchOutcome::default();
        if !hb.log_payload.is_empty() {
            outcome.log_payload = Some(hb.log_payload.clone());
        }
        if !hb.trace_payload.is_empty() {
            outcome.trace_payload = Some(hb.trace_payload.clone());
        }
        outcome.revoke = hb.revoke.keys().cloned().collect();
        if compare_versions(&hb.protocol_version, min_protocol_version) == Ordering::Less {
            outcome.version_mismatch = Some(format!(
                "protocol version {} is below the minimum supported {}",
                hb.protocol_version, min_protocol_version
            ));
        }

        let heartbeat = HeartbeatState {
            version: hb.protocol_version.clone(),
            host: hb.host.clone(),
            uuid: hb.uuid.clone(),
            pid: hb.pid,
            start_time: hb.start_time,
            last_heartbeat: hb.clock,
            lease_time_secs: hb.lease_time,
            shutdown: hb.shutdown,
            mount_kind: hb.mount_kind,
            protocol_version: hb.protocol_version.clone(),
            revoke: hb.revoke.clone(),
            log_payload: None,
            trace_payload: None,
        };

        let mut clients = self.clients.write().expect("registry lock");
        outcome.first_mount = !clients.by_id.contains_key(&clientid);

        match clients.by_id.get_mut(&clientid) {
            Some(session) => {
                if hb.ops_count != session.statistics.ops_count {
                    session.last_ops_time = now.sec;
                }
                session.statistics.ops_count = hb.ops_count;
                session.heartbeat = heartbeat;
                session.state = ClientState::Online;
            }
            None => {
                clients
                    .by_id
                    .insert(clientid.clone(), ClientSession::new(heartbeat, now));
            }
        }
        clients.ids_by_uuid.insert(hb.uuid, clientid);

        outcome
    }

    /// spec.md §4.2 "State machine", run once per second by the heartbeat
    /// monitor. All clients are judged against the single `now` snapshot
    /// passed in, per spec.md §5's concurrency note.
    pub fn tick(&self, now: Timestamp, windows: &HeartbeatWindows) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        let mut clients = self.clients.write().expect("registry lock");
        let mut to_remove = Vec::new();

        for (clientid, session) in clients.by_id.iter_mut() {
            let uuid = session.heartbeat.uuid.clone();
            let age = session.heartbeat_age_secs(now);
            let from = session.state;

            let to = if session.heartbeat.shutdown {
                ClientState::Evicted
            } else if age > windows.heartbeat_remove_window_secs() {
                ClientState::Evicted
            } else if age > windows.heartbeat_offline_window_secs() {
                ClientState::Offline
            } else if age > windows.heartbeat_window_secs() {
                ClientState::Volatile
            } else {
                ClientState::Online
            };

            if to == from {
                continue;
            }
            session.state = to;
            outcome.transitions.push(Transition {
                clientid: clientid.clone(),
                uuid: uuid.clone(),
                from,
                to,
            });

            if to == ClientState::Offline || to == ClientState::Evicted {
                outcome.drop_locks_for.push(uuid.clone());
            }
            if to == ClientState::Evicted {
                to_remove.push((clientid.clone(), uuid));
            }
        }

        for (clientid, uuid) in to_remove {
            clients.by_id.remove(&clientid);
            if clients.ids_by_uuid.get(&uuid) == Some(&clientid) {
                clients.ids_by_uuid.remove(&uuid);
            }
            outcome.evicted.push(clientid);
        }

        outcome
    }

    /// spec.md §4.2 `Evict(uuid, reason)`.
    pub fn evict(&self, target: EvictTarget<'_>, reason: &str, now: Timestamp) -> EvictOutcome {
        match target {
            EvictTarget::ClientUuid(uuid) => self.evict_one(uuid, now),
            EvictTarget::StaticByPredicate => self.evict_by_predicate(MountKind::Static, reason, now),
            EvictTarget::AutofsByPredicate => self.evict_by_predicate(MountKind::Autofs, reason, now),
        }
    }

    fn evict_one(&self, uuid: &ClientUuid, _now: Timestamp) -> EvictOutcome {
        let mut clients = self.clients.write().expect("registry lock");
        let clientid = clients.ids_by_uuid.remove(uuid);
        let found = clientid.is_some();
        if let Some(clientid) = &clientid {
            clients.by_id.remove(clientid);
        }
        EvictOutcome {
            evicted: clientid.into_iter().collect(),
            drop_locks_for: vec![uuid.clone()],
            found,
        }
    }

    fn evict_by_predicate(&self, kind: MountKind, reason: &str, now: Timestamp) -> EvictOutcome {
        let predicate = match EvictPredicate::parse(reason) {
            Some(p) => p,
            None => return EvictOutcome::default(),
        };

        let mut clients = self.clients.write().expect("registry lock");
        let matching: Vec<(ClientId, ClientUuid)> = clients
            .by_id
            .iter()
            .filter(|(_, session)| {
                session.heartbeat.mount_kind == kind && predicate.matches(session, now)
            })
            .map(|(clientid, session)| (clientid.clone(), session.heartbeat.uuid.clone()))
            .collect();

        let mut outcome = EvictOutcome {
            found: !matching.is_empty(),
            ..Default::default()
        };
        for (clientid, uuid) in matching {
            clients.by_id.remove(&clientid);
            if clients.ids_by_uuid.get(&uuid) == Some(&clientid) {
                clients.ids_by_uuid.remove(&uuid);
            }
            outcome.evicted.push(clientid);
            outcome.drop_locks_for.push(uuid);
        }
        outcome
    }

    pub fn idle_bucket(&self, clientid: &ClientId, now: Timestamp) -> Option<IdleBucket> {
        let clients = self.clients.read().expect("registry lock");
        clients
            .by_id
            .get(clientid)
            .map(|session| IdleBucket::classify(now.elapsed_secs_since(Timestamp::new(session.last_ops_time, 0))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusex_common::wire::RevokeRequest;
    use std::collections::HashMap as Map;

    fn heartbeat(uuid: &str, clock: Timestamp, shutdown: bool) -> Heartbeat {
        Heartbeat {
            host: "host1".into(),
            uuid: ClientUuid::from(uuid),
            pid: 42,
            start_time: Timestamp::ZERO,
            mount_kind: MountKind::Static,
            protocol_version: "4.5.0".into(),
            lease_time: None,
            shutdown,
            clock,
            log_payload: Vec::new(),
            trace_payload: Vec::new(),
            revoke: Map::new(),
            ops_count: 0,
        }
    }

    #[test]
    fn dispatch_marks_first_mount_and_tracks_uuid() {
        let reg = ClientRegistry::new();
        let now = Timestamp::new(1_000, 0);
        let outcome = reg.dispatch(
            ClientId::from("c1"),
            heartbeat("u1", now, false),
            now,
            130,
            "4.0.0",
        );
        assert!(outcome.first_mount);
        assert!(!outcome.dropped_stale_heartbeat);
        assert_eq!(reg.clientid_for_uuid(&ClientUuid::from("u1")), Some(ClientId::from("c1")));

        let outcome2 = reg.dispatch(
            ClientId::from("c1"),
            heartbeat("u1", now, false),
            now,
            130,
            "4.0.0",
        );
        assert!(!outcome2.first_mount);
    }

    #[test]
    fn dispatch_drops_stale_heartbeat() {
        let reg = ClientRegistry::new();
        let now = Timestamp::new(1_000, 0);
        let stale_clock = Timestamp::new(0, 0);
        let outcome = reg.dispatch(
            ClientId::from("c1"),
            heartbeat("u1", stale_clock, false),
            now,
            130,
            "4.0.0",
        );
        assert!(outcome.dropped_stale_heartbeat);
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn dispatch_flags_version_mismatch() {
        let reg = ClientRegistry::new();
        let now = Timestamp::new(1_000, 0);
        let mut hb = heartbeat("u1", now, false);
        hb.protocol_version = "3.9.0".into();
        let outcome = reg.dispatch(ClientId::from("c1"), hb, now, 130, "4.0.0");
        assert!(outcome.version_mismatch.is_some());
    }

    #[test]
    fn dispatch_queues_revoke_requests() {
        let reg = ClientRegistry::new();
        let now = Timestamp::new(1_000, 0);
        let mut hb = heartbeat("u1", now, false);
        hb.revoke.insert(AuthId::from("a1"), RevokeRequest { reason: "stale".into() });
        let outcome = reg.dispatch(ClientId::from("c1"), hb, now, 130, "4.0.0");
        assert_eq!(outcome.revoke, vec![AuthId::from("a1")]);
    }

    #[test]
    fn tick_walks_online_through_volatile_offline_evicted() {
        let reg = ClientRegistry::new();
        let windows = HeartbeatWindowsBuilder::default()
            .heartbeat_window_secs(10u64)
            .heartbeat_offline_window_secs(20u64)
            .heartbeat_remove_window_secs(30u64)
            .build()
            .unwrap();
        let t0 = Timestamp::new(0, 0);
        reg.dispatch(ClientId::from("c1"), heartbeat("u1", t0, false), t0, 130, "4.0.0");

        let t1 = Timestamp::new(11, 0);
        let tick1 = reg.tick(t1, &windows);
        assert_eq!(tick1.transitions.len(), 1);
        assert_eq!(tick1.transitions[0].to, ClientState::Volatile);
        assert!(tick1.drop_locks_for.is_empty());

        let t2 = Timestamp::new(21, 0);
        let tick2 = reg.tick(t2, &windows);
        assert_eq!(tick2.transitions[0].to, ClientState::Offline);
        assert_eq!(tick2.drop_locks_for, vec![ClientUuid::from("u1")]);

        let t3 = Timestamp::new(31, 0);
        let tick3 = reg.tick(t3, &windows);
        assert_eq!(tick3.transitions[0].to, ClientState::Evicted);
        assert_eq!(tick3.evicted, vec![ClientId::from("c1")]);
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn shutdown_flag_evicts_from_any_state() {
        let reg = ClientRegistry::new();
        let windows = HeartbeatWindows::default();
        let t0 = Timestamp::new(0, 0);
        reg.dispatch(ClientId::from("c1"), heartbeat("u1", t0, false), t0, 130, "4.0.0");
        reg.dispatch(ClientId::from("c1"), heartbeat("u1", t0, true), t0, 130, "4.0.0");

        let tick = reg.tick(t0, &windows);
        assert_eq!(tick.transitions[0].to, ClientState::Evicted);
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn evict_by_uuid_drops_locks_even_when_unknown() {
        let reg = ClientRegistry::new();
        let outcome = reg.evict(
            EvictTarget::ClientUuid(&ClientUuid::from("ghost")),
            "manual",
            Timestamp::ZERO,
        );
        assert!(!outcome.found);
        assert_eq!(outcome.drop_locks_for, vec![ClientUuid::from("ghost")]);
    }

    #[test]
    fn evict_by_idle_predicate_matches_static_mounts() {
        let reg = ClientRegistry::new();
        let t0 = Timestamp::new(0, 0);
        reg.dispatch(ClientId::from("c1"), heartbeat("u1", t0, false), t0, 130, "4.0.0");

        let outcome = reg.evict(EvictTarget::StaticByPredicate, "idle:3600", Timestamp::new(3_601, 0));
        assert_eq!(outcome.evicted, vec![ClientId::from("c1")]);
    }

    #[test]
    fn idle_bucket_reports_active_for_recent_ops() {
        let reg = ClientRegistry::new();
        let t0 = Timestamp::new(0, 0);
        reg.dispatch(ClientId::from("c1"), heartbeat("u1", t0, false), t0, 130, "4.0.0");
        assert_eq!(reg.idle_bucket(&ClientId::from("c1"), t0), Some(IdleBucket::Active));
    }
}
