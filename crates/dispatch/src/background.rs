//! The two long-running loops a `fusexd` process drives alongside request
//! dispatch: the heartbeat monitor (spec.md §4.2 "State machine") and the
//! CAP monitor (spec.md §4.5 "CAP monitor").

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use fusex_common::wire::ServerPush;
use fusex_common::{ClientUuid, Timestamp};
use fusex_registry::HeartbeatWindows;
use log::{debug, info};
use tokio::sync::watch;
use tokio::time;

use crate::dispatcher::Dispatcher;

/// Runs `ClientRegistry::tick` once per `heartbeat_interval_secs`, dropping
/// byte-range locks for every UUID demoted past VOLATILE exactly once per
/// tick, and pushing `Evict` to clients the tick removes from the registry.
pub async fn run_heartbeat_monitor(
    dispatcher: Arc<Dispatcher>,
    windows: HeartbeatWindows,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(Duration::from_secs(windows.heartbeat_interval_secs().max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Timestamp::now();
                let outcome = dispatcher.registry.tick(now, &windows);

                let mut dropped = HashSet::new();
                for uuid in &outcome.drop_locks_for {
                    if dropped.insert(uuid.clone()) {
                        dispatcher.locks.drop_locks_for_uuid(uuid).await;
                    }
                }
                for transition in &outcome.transitions {
                    debug!("client {:?} {:?} -> {:?}", transition.clientid, transition.from, transition.to);
                }
                for clientid in &outcome.evicted {
                    let _ = dispatcher
                        .transport
                        .send(clientid, ServerPush::Evict { reason: "heartbeat".to_string() })
                        .await;
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("heartbeat monitor shutting down");
                    break;
                }
            }
        }
    }
}

/// Runs the CAP monitor: pops expired caps off `CapStore`'s expiry heap as
/// soon as they're due, and every `quota_check_interval_ticks` ticks sweeps
/// every live cap for quota-group crossings.
pub async fn run_cap_monitor(dispatcher: Arc<Dispatcher>, mut shutdown: watch::Receiver<bool>) {
    const TICK: Duration = Duration::from_secs(1);
    let expiry_margin = Duration::from_secs(0);
    let mut ticker = time::interval(TICK);
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Timestamp::now();
                while dispatcher.caps.expire_due(now, expiry_margin) {
                    let Some(cap) = dispatcher.caps.pop() else { break };
                    dispatcher
                        .broadcast
                        .notify_owner(
                            &*dispatcher.transport,
                            &cap,
                            ServerPush::ReleaseCap { md_ino: cap.inode, clientid: cap.clientid.clone() },
                        )
                        .await;
                }

                ticks += 1;
                if ticks >= dispatcher.config.quota_check_interval_ticks() as u64 {
                    ticks = 0;
                    sweep_quotas(&dispatcher, now).await;
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("cap monitor shutting down");
                    break;
                }
            }
        }
    }
}

/// Groups every live cap by `(uid, gid, quota_node_inode)`, detects budget
/// crossings, and ages out groups that have been over quota longer than
/// `quota_overage_grace_secs`.
///
/// There's no dedicated "out of quota since" field on a cap, so this reuses
/// `Cap::errc` — otherwise a generic scratch/error-code slot — as a non-zero
/// since-timestamp sentinel, cleared back to `0` on recovery.
async fn sweep_quotas(dispatcher: &Dispatcher, now: Timestamp) {
    let caps = dispatcher.caps.all_caps();
    let mut groups: HashMap<(u32, u32, fusex_common::Inode), Vec<Arc<fusex_capstore::Cap>>> = HashMap::new();
    for cap in caps {
        groups
            .entry((cap.uid, cap.gid, cap.quota.quota_node_inode))
            .or_default()
            .push(cap);
    }

    for ((_, _, _), members) in groups {
        let over_quota = members
            .iter()
            .any(|cap| cap.quota.inode_budget <= 0 || cap.quota.volume_budget <= 0);

        for cap in members {
            let since = cap.errc as u64;
            if over_quota && since == 0 {
                let mut refreshed = (*cap).clone();
                refreshed.errc = now.sec.max(1) as i32;
                if let Ok(stored) = dispatcher.caps.store(refreshed) {
                    dispatcher
                        .broadcast
                        .notify_owner(
                            &*dispatcher.transport,
                            &stored,
                            ServerPush::Cap(dispatcher.cap_body(&stored)),
                        )
                        .await;
                }
            } else if !over_quota && since != 0 {
                let mut refreshed = (*cap).clone();
                refreshed.errc = 0;
                if let Ok(stored) = dispatcher.caps.store(refreshed) {
                    dispatcher
                        .broadcast
                        .notify_owner(
                            &*dispatcher.transport,
                            &stored,
                            ServerPush::Cap(dispatcher.cap_body(&stored)),
                        )
                        .await;
                }
            } else if over_quota
                && since != 0
                && now.elapsed_secs_since(Timestamp::new(since, 0))
                    > dispatcher.config.quota_overage_grace_secs()
            {
                dispatcher.caps.remove(&cap);
                dispatcher
                    .broadcast
                    .notify_owner(
                        &*dispatcher.transport,
                        &cap,
                        ServerPush::ReleaseCap { md_ino: cap.inode, clientid: cap.clientid.clone() },
                    )
                    .await;
            }
        }
    }
}
