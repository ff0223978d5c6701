//! `Dispatcher`: the single entry point a transport hands decoded
//! [`Request`]s to (spec.md §4.4). Per-operation behavior lives in
//! `crates/dispatch/src/handlers/*`, one file per op, each an `impl
//! Dispatcher` block — mirroring the teacher's
//! `runtime_service/{mod.rs,create_container.rs,...}` layout.

use std::sync::Arc;

use fusex_broadcast::BroadcastEngine;
use fusex_capstore::CapStore;
use fusex_common::collaborators::{BroadcastTransport, ByteRangeLockService, FlushService, NamespaceStore};
use fusex_common::wire::{Ack, Heartbeat, Request, Response, ServerPush};
use fusex_common::{ClientId, ClientUuid, Inode, Timestamp};
use fusex_registry::{ClientRegistry, HeartbeatWindows};
use log::{debug, warn};

use crate::config::DispatchConfig;
use crate::op::{self, Op, RequestContext};

pub struct Dispatcher {
    pub(crate) namespace: Arc<dyn NamespaceStore>,
    pub(crate) locks: Arc<dyn ByteRangeLockService>,
    pub(crate) flush: Arc<dyn FlushService>,
    pub(crate) transport: Arc<dyn BroadcastTransport>,
    pub(crate) caps: Arc<CapStore>,
    pub(crate) registry: Arc<ClientRegistry>,
    pub(crate) broadcast: Arc<BroadcastEngine>,
    pub(crate) config: DispatchConfig,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        namespace: Arc<dyn NamespaceStore>,
        locks: Arc<dyn ByteRangeLockService>,
        flush: Arc<dyn FlushService>,
        transport: Arc<dyn BroadcastTransport>,
        caps: Arc<CapStore>,
        registry: Arc<ClientRegistry>,
        broadcast: Arc<BroadcastEngine>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            namespace,
            locks,
            flush,
            transport,
            caps,
            registry,
            broadcast,
            config,
        }
    }

    /// The single match point DESIGN NOTES (spec.md §9) asks for.
    pub async fn dispatch(&self, req: Request, transactionid: u64, now: Timestamp) -> Response {
        let ctx = op::context_of(&req);
        let parsed = match Op::from_request(&req) {
            Ok(op) => op,
            Err(errno) => return ack_error(transactionid, errno),
        };

        let result = match parsed {
            Op::Get(args) => self.handle_get(args, &ctx, transactionid, now, false).await,
            Op::Ls(args) => self.handle_get(args, &ctx, transactionid, now, true).await,
            Op::Set(args) => self.handle_set(args, &ctx, transactionid, now).await,
            Op::Delete(args) => self.handle_delete(args, &ctx, transactionid, now).await,
            Op::Getcap(args) => self.handle_getcap(args, &ctx, transactionid, now).await,
            Op::Getlk(args) => self.handle_getlk(args, transactionid).await,
            Op::Setlk(args) => self.handle_setlk(args, transactionid).await,
            Op::Setlkw(args) => self.handle_setlk(args, transactionid).await,
            Op::Beginflush(args) => self.handle_beginflush(args, &ctx, transactionid).await,
            Op::Endflush(args) => self.handle_endflush(args, &ctx, transactionid).await,
        };

        match result {
            Ok(response) => response,
            Err(err) => ack_error(transactionid, err.to_errno()),
        }
    }

    /// `Dropcaps(uuid)` (spec.md §4.2): every client sharing `uuid` loses
    /// every cap it holds. Lives here, not in `registry` or `capstore`,
    /// because it is the one operation that needs both at once.
    pub async fn dropcaps(&self, uuid: &ClientUuid) {
        let caps = self.caps.caps_for_uuid(uuid);
        for cap in caps {
            self.caps.remove(&cap);
            self.broadcast
                .notify_owner(
                    &*self.transport,
                    &cap,
                    ServerPush::ReleaseCap {
                        md_ino: cap.inode,
                        clientid: cap.clientid.clone(),
                    },
                )
                .await;
        }
        if let Some(clientid) = self.registry.clientid_for_uuid(uuid) {
            let _ = self.transport.send(&clientid, ServerPush::Dropcaps).await;
        }
    }

    /// `Dispatch(identity, hb)` (spec.md §4.2 "Heartbeat ingestion"):
    /// first-mount cap amnesty + config push, log/trace payload draining,
    /// queued revokes, and version-mismatch eviction — everything the
    /// registry's own `dispatch` leaves for the caller to do outside its
    /// lock.
    pub async fn ingest_heartbeat(&self, clientid: ClientId, hb: Heartbeat, now: Timestamp, windows: &HeartbeatWindows) {
        if !hb.log_payload.is_empty() || !hb.trace_payload.is_empty() {
            debug!(
                "client {} sent {} bytes of log payload, {} bytes of trace payload",
                clientid,
                hb.log_payload.len(),
                hb.trace_payload.len()
            );
        }

        let outcome = self.registry.dispatch(
            clientid.clone(),
            hb,
            now,
            windows.heartbeat_offline_window_secs(),
            windows.min_protocol_version(),
        );

        if outcome.dropped_stale_heartbeat {
            return;
        }

        if outcome.first_mount {
            let _ = self.transport.send(&clientid, ServerPush::Dropcaps).await;
            let _ = self
                .transport
                .send(
                    &clientid,
                    ServerPush::Config {
                        hbrate: self.config.hbrate_secs(),
                        dentrymessaging: true,
                        writesizeflush: true,
                        appname: self.config.server_version().clone(),
                        mdquery: true,
                        hideversion: false,
                        serverversion: self.config.server_version().clone(),
                    },
                )
                .await;
        }

        for authid in outcome.revoke {
            if let Some(cap) = self.caps.get(&authid, false) {
                self.caps.remove(&cap);
                self.broadcast
                    .notify_owner(
                        &*self.transport,
                        &cap,
                        ServerPush::ReleaseCap { md_ino: cap.inode, clientid: cap.clientid.clone() },
                    )
                    .await;
            }
        }

        if let Some(reason) = outcome.version_mismatch {
            warn!("evicting client {}: {}", clientid, reason);
            let _ = self.transport.send(&clientid, ServerPush::Evict { reason: reason.clone() }).await;
            let evicted = self
                .registry
                .evict(fusex_registry::EvictTarget::ClientUuid(&self.registry_uuid_for(&clientid)), &reason, now);
            for uuid in evicted.drop_locks_for {
                self.locks.drop_locks_for_uuid(&uuid).await;
            }
        }
    }

    fn registry_uuid_for(&self, clientid: &ClientId) -> ClientUuid {
        self.registry
            .session(clientid)
            .map(|s| s.heartbeat.uuid.clone())
            .unwrap_or_default()
    }

    pub(crate) fn cap_body(&self, cap: &fusex_capstore::Cap) -> fusex_common::wire::CapBody {
        fusex_common::wire::CapBody {
            authid: cap.authid.clone(),
            inode: cap.inode,
            clientid: cap.clientid.clone(),
            clientuuid: cap.clientuuid.clone(),
            uid: cap.uid,
            gid: cap.gid,
            mode: cap.mode,
            vtime: cap.vtime,
            quota_inodes: cap.quota.inode_budget,
            quota_bytes: cap.quota.volume_budget,
            quota_node_inode: cap.quota.quota_node_inode,
            max_file_size: cap.max_file_size,
            errc: cap.errc,
        }
    }

    pub(crate) async fn quota_of(&self, entry: &fusex_common::collaborators::EntryMetadata) -> fusex_common::QuotaSnapshot {
        let node = entry
            .attr("sys.quota.node")
            .and_then(|s| s.parse::<u64>().ok())
            .map(fusex_common::Inode)
            .unwrap_or(entry.inode);
        self.namespace
            .quota_for(entry.uid, entry.gid, node)
            .await
            .unwrap_or_else(|_| fusex_common::QuotaSnapshot::unlimited())
    }

    /// `SendMD`'s directory-audience half (spec.md §4.2): peers who have a
    /// cap on the containing directory get the updated entry, one push per
    /// uuid (spec.md §4.3 "each UUID receives at most one update per
    /// broadcast").
    pub(crate) async fn broadcast_md(
        &self,
        ctx: &RequestContext,
        inode: Inode,
        parent_inode: Inode,
        entry: &fusex_common::collaborators::EntryMetadata,
    ) {
        let candidates = self.caps.caps_for_inode(parent_inode);
        let audience = fusex_broadcast::select_audience(
            candidates,
            &ctx.authid,
            &ctx.clientuuid,
            &ctx.clientuuid,
            self.config.broadcast_max_audience(),
            self.config.broadcast_audience_suppress_match().as_deref(),
            true,
        );
        let md = crate::handlers::get::entry_to_md(entry, None);
        self.broadcast
            .send_to_audience(
                &*self.transport,
                audience,
                ServerPush::Md {
                    md,
                    clientid: ctx.clientid.clone(),
                    md_ino: inode,
                    md_pino: parent_inode,
                    clock: entry.clock,
                    pt_mtime: Some(entry.mtime),
                },
            )
            .await;
    }

    /// `BroadcastRelease` + `BroadcastRefresh` (spec.md §4.2, attached to
    /// `SET`'s `UPDATE`/`RENAME`/`MOVE` outcomes): every other peer holding
    /// a cap directly on the changed inode gets it revoked, then — unless
    /// its protocol is old enough to be silenced — told to refetch.
    pub(crate) async fn broadcast_release_and_refresh(&self, ctx: &RequestContext, inode: Inode) {
        let candidates = self.caps.caps_for_inode(inode);
        let audience = fusex_broadcast::select_audience(
            candidates.clone(),
            &ctx.authid,
            &ctx.clientuuid,
            &ctx.clientuuid,
            self.config.broadcast_max_audience(),
            self.config.broadcast_audience_suppress_match().as_deref(),
            false,
        );
        self.broadcast
            .send_to_audience(
                &*self.transport,
                audience,
                ServerPush::ReleaseCap {
                    md_ino: inode,
                    clientid: ctx.clientid.clone(),
                },
            )
            .await;

        for cap in candidates {
            if cap.authid == ctx.authid || cap.clientuuid == ctx.clientuuid {
                continue;
            }
            let version = self
                .registry
                .session(&cap.clientid)
                .map(|s| s.heartbeat.protocol_version)
                .unwrap_or_default();
            self.broadcast
                .send_md_refresh_aware(
                    &*self.transport,
                    &cap.clientid,
                    &version,
                    ServerPush::Refresh { md_ino: inode },
                    true,
                )
                .await;
        }
    }

    /// `BroadcastDentryRemove` (spec.md §4.2, `DELETE`).
    pub(crate) async fn broadcast_dentry_remove(
        &self,
        ctx: &RequestContext,
        parent_inode: Inode,
        removed_inode: Inode,
        name: &str,
    ) {
        let candidates = self.caps.caps_for_inode(parent_inode);
        let audience = fusex_broadcast::select_audience(
            candidates,
            &ctx.authid,
            &ctx.clientuuid,
            &ctx.clientuuid,
            self.config.broadcast_max_audience(),
            self.config.broadcast_audience_suppress_match().as_deref(),
            true,
        );
        self.broadcast
            .send_to_audience(
                &*self.transport,
                audience,
                ServerPush::DentryRemove {
                    name: name.to_string(),
                    md_ino: removed_inode,
                    clientid: ctx.clientid.clone(),
                },
            )
            .await;
    }
}

pub(crate) fn ack_error(transactionid: u64, errno: fusex_common::Errno) -> Response {
    Response::Ack(Ack::error(transactionid, errno, errno.to_string()))
}

pub(crate) fn ack_ok(transactionid: u64) -> Response {
    Response::Ack(Ack::ok(transactionid))
}

pub(crate) fn not_modified(transactionid: u64) -> Response {
    Response::Ack(Ack::not_modified(transactionid))
}
