//! The CAP store: the four-way (six-index) directory of currently valid
//! capabilities (spec.md §3 "Capability indices", §4.1 "Operations").

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;

use fusex_common::{AuthId, ClientId, ClientUuid, Inode, Timestamp};

use crate::derive::{derive_cap_mode, CapDerivation, ParentContext, VirtualIdentity};
use crate::error::CapStoreError;
use crate::Cap;

#[derive(Default)]
struct Indices {
    by_auth_id: HashMap<AuthId, Arc<Cap>>,
    by_inode: HashMap<Inode, HashSet<AuthId>>,
    by_client: HashMap<ClientId, HashSet<AuthId>>,
    by_client_inode: HashMap<ClientId, HashMap<Inode, HashSet<AuthId>>>,
    by_expiry: BTreeSet<(Timestamp, AuthId)>,
    client_ids_by_uuid: HashMap<ClientUuid, HashSet<ClientId>>,
}

impl Indices {
    fn insert(&mut self, cap: Arc<Cap>) {
        self.by_inode
            .entry(cap.inode)
            .or_default()
            .insert(cap.authid.clone());
        self.by_client
            .entry(cap.clientid.clone())
            .or_default()
            .insert(cap.authid.clone());
        self.by_client_inode
            .entry(cap.clientid.clone())
            .or_default()
            .entry(cap.inode)
            .or_default()
            .insert(cap.authid.clone());
        self.client_ids_by_uuid
            .entry(cap.clientuuid.clone())
            .or_default()
            .insert(cap.clientid.clone());
        self.by_expiry.insert((cap.vtime, cap.authid.clone()));
        self.by_auth_id.insert(cap.authid.clone(), cap);
    }

    /// Remove `cap` from every index except `by_expiry`, which is cleaned
    /// lazily (spec.md §4.1 "Remove").
    fn remove(&mut self, cap: &Cap) {
        self.by_auth_id.remove(&cap.authid);

        if let Some(set) = self.by_inode.get_mut(&cap.inode) {
            set.remove(&cap.authid);
            if set.is_empty() {
                self.by_inode.remove(&cap.inode);
            }
        }
        if let Some(set) = self.by_client.get_mut(&cap.clientid) {
            set.remove(&cap.authid);
            if set.is_empty() {
                self.by_client.remove(&cap.clientid);
            }
        }
        if let Some(by_inode) = self.by_client_inode.get_mut(&cap.clientid) {
            if let Some(set) = by_inode.get_mut(&cap.inode) {
                set.remove(&cap.authid);
                if set.is_empty() {
                    by_inode.remove(&cap.inode);
                }
            }
            if by_inode.is_empty() {
                self.by_client_inode.remove(&cap.clientid);
            }
        }
    }

    fn authids_for_client_inode(&self, client: &ClientId, inode: Inode) -> Vec<AuthId> {
        self.by_client_inode
            .get(client)
            .and_then(|m| m.get(&inode))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// The capability store. All six indices are mutated atomically under one
/// lock; readers pay the same lock because updates are frequent enough
/// that an RCU domain's drain cost would dominate (spec.md §5).
pub struct CapStore {
    indices: Mutex<Indices>,
    op_count: AtomicU64,
}

impl Default for CapStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CapStore {
    pub fn new() -> Self {
        Self {
            indices: Mutex::new(Indices::default()),
            op_count: AtomicU64::new(0),
        }
    }

    pub fn op_count(&self) -> u64 {
        self.op_count.load(Ordering::Relaxed)
    }

    /// `Store(cap, vid)` (spec.md §4.1). Installs a fully-formed cap under
    /// its `authid`. If an existing cap under the same `authid` is bound to
    /// a different inode, it is removed first.
    pub fn store(&self, cap: Cap) -> Result<Arc<Cap>, CapStoreError> {
        if cap.inode == Inode::ZERO {
            return Err(CapStoreError::MissingInode);
        }
        if cap.authid.is_empty() {
            return Err(CapStoreError::MissingAuthId);
        }
        if cap.clientid.is_empty() {
            return Err(CapStoreError::MissingClientId);
        }
        if cap.clientuuid.is_empty() {
            return Err(CapStoreError::MissingClientUuid);
        }

        let cap = Arc::new(cap);
        let mut indices = self.indices.lock().expect("cap store lock");
        if let Some(existing) = indices.by_auth_id.get(&cap.authid) {
            if existing.inode != cap.inode {
                let stale = existing.clone();
                indices.remove(&stale);
            }
        }
        indices.insert(cap.clone());
        self.op_count.fetch_add(1, Ordering::Relaxed);
        Ok(cap)
    }

    /// `Imply(inode, src_authid, new_authid)` (spec.md §4.1). Fails silently
    /// (returns `None`) if the source cap is absent or its inode is zero.
    pub fn imply(
        &self,
        inode: Inode,
        src_authid: &AuthId,
        new_authid: AuthId,
        now: Timestamp,
        lease_hint: Option<Duration>,
    ) -> Option<Arc<Cap>> {
        let src = self.get(src_authid, false)?;
        if src.inode == Inode::ZERO {
            return None;
        }
        let lease = lease_hint
            .unwrap_or(crate::derive::DEFAULT_LEASE)
            .min(crate::derive::MAX_LEASE);
        let derived = Cap {
            authid: new_authid,
            inode,
            clientid: src.clientid.clone(),
            clientuuid: src.clientuuid.clone(),
            uid: src.uid,
            gid: src.gid,
            mode: src.mode,
            vtime: now + lease,
            quota: src.quota,
            max_file_size: src.max_file_size,
            errc: src.errc,
        };
        self.store(derived).ok()
    }

    /// `Get(authid, make_default)` (spec.md §4.1). No side effects.
    pub fn get(&self, authid: &AuthId, make_default: bool) -> Option<Arc<Cap>> {
        let indices = self.indices.lock().expect("cap store lock");
        match indices.by_auth_id.get(authid).cloned() {
            Some(cap) => Some(cap),
            None if make_default => Some(Arc::new(Cap::sentinel())),
            None => None,
        }
    }

    /// `Remove(cap)` (spec.md §4.1).
    pub fn remove(&self, cap: &Cap) {
        let mut indices = self.indices.lock().expect("cap store lock");
        indices.remove(cap);
    }

    /// `Delete(inode)` (spec.md §4.1). Returns the removed caps so callers
    /// (the dispatcher, the registry) can broadcast their removal.
    pub fn delete(&self, inode: Inode) -> Vec<Arc<Cap>> {
        let mut indices = self.indices.lock().expect("cap store lock");
        let authids: Vec<AuthId> = indices
            .by_inode
            .get(&inode)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        let mut removed = Vec::with_capacity(authids.len());
        for authid in authids {
            if let Some(cap) = indices.by_auth_id.get(&authid).cloned() {
                indices.remove(&cap);
                removed.push(cap);
            }
        }
        self.op_count.fetch_add(1, Ordering::Relaxed);
        removed
    }

    /// `byInode[i]` materialized as caps, for broadcast audience selection
    /// (spec.md §4.3 "Audience selection").
    pub fn caps_for_inode(&self, inode: Inode) -> Vec<Arc<Cap>> {
        let indices = self.indices.lock().expect("cap store lock");
        indices
            .by_inode
            .get(&inode)
            .map(|set| {
                set.iter()
                    .filter_map(|authid| indices.by_auth_id.get(authid).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every currently-stored cap bound to `clientuuid` (spec.md §4.2
    /// `Dropcaps`: "walk the CAP store's inode index, collect every cap
    /// whose clientuuid matches").
    pub fn caps_for_uuid(&self, clientuuid: &ClientUuid) -> Vec<Arc<Cap>> {
        let indices = self.indices.lock().expect("cap store lock");
        indices
            .by_auth_id
            .values()
            .filter(|cap| &cap.clientuuid == clientuuid)
            .cloned()
            .collect()
    }

    /// Every client id the CAP store has ever seen a cap issued to under
    /// `clientuuid` (spec.md §3 `clientIdsByUUID`).
    pub fn client_ids_for_uuid(&self, clientuuid: &ClientUuid) -> Vec<ClientId> {
        let indices = self.indices.lock().expect("cap store lock");
        indices
            .client_ids_by_uuid
            .get(clientuuid)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every cap currently stored, for the CAP monitor's quota sweep
    /// (spec.md §4.5 "CAP monitor"), which must group live caps by
    /// `(uid, gid, quota_node_inode)` regardless of which inode or client
    /// they're bound to.
    pub fn all_caps(&self) -> Vec<Arc<Cap>> {
        let indices = self.indices.lock().expect("cap store lock");
        indices.by_auth_id.values().cloned().collect()
    }

    /// `Expire()`: does the earliest `byExpiry` entry, plus a fixed safety
    /// margin, lie in the past?
    pub fn expire_due(&self, now: Timestamp, margin: Duration) -> bool {
        let indices = self.indices.lock().expect("cap store lock");
        indices
            .by_expiry
            .iter()
            .next()
            .is_some_and_vtime_due(now, margin)
    }

    /// `Pop()`: unconditionally consume the earliest `byExpiry` entry,
    /// removing the referenced cap if it is still present. A missing
    /// `byAuthId` lookup means it already expired via another path; the
    /// stale expiry entry is simply dropped.
    pub fn pop(&self) -> Option<Arc<Cap>> {
        let mut indices = self.indices.lock().expect("cap store lock");
        let head = indices.by_expiry.iter().next().cloned()?;
        indices.by_expiry.remove(&head);
        let (_, authid) = head;
        match indices.by_auth_id.get(&authid).cloned() {
            Some(cap) => {
                indices.remove(&cap);
                debug!("expired cap {authid} on inode {}", cap.inode);
                Some(cap)
            }
            None => None,
        }
    }

    /// Issue a new cap for `(client, inode)`, applying §4.1's duplicate
    /// suppression: if `issue_only_one` and the client already holds a cap
    /// on this inode, the existing cap is returned unchanged. Otherwise any
    /// other caps this `(clientid, inode)` pair holds under different
    /// `authid`s are removed after the new one is stored.
    #[allow(clippy::too_many_arguments)]
    pub fn issue(
        &self,
        parent: &ParentContext,
        identity: &VirtualIdentity,
        inode: Inode,
        clientid: &ClientId,
        clientuuid: &ClientUuid,
        now: Timestamp,
        lease_hint: Option<Duration>,
        issue_only_one: bool,
    ) -> Arc<Cap> {
        if issue_only_one {
            let existing = {
                let indices = self.indices.lock().expect("cap store lock");
                indices
                    .authids_for_client_inode(clientid, inode)
                    .into_iter()
                    .next()
                    .and_then(|authid| indices.by_auth_id.get(&authid).cloned())
            };
            if let Some(existing) = existing {
                return existing;
            }
        }

        let others = {
            let indices = self.indices.lock().expect("cap store lock");
            indices.authids_for_client_inode(clientid, inode)
        };

        let CapDerivation {
            mode,
            uid,
            gid,
            vtime,
            authid,
            quota,
        } = derive_cap_mode(parent, identity, now, lease_hint, None);

        let cap = Cap {
            authid,
            inode,
            clientid: clientid.clone(),
            clientuuid: clientuuid.clone(),
            uid,
            gid,
            mode,
            vtime,
            quota,
            max_file_size: u64::MAX,
            errc: 0,
        };
        let stored = self
            .store(cap)
            .expect("issue() always builds a structurally valid cap");

        if !others.is_empty() {
            let indices_caps: Vec<Arc<Cap>> = {
                let indices = self.indices.lock().expect("cap store lock");
                others
                    .iter()
                    .filter(|a| **a != stored.authid)
                    .filter_map(|a| indices.by_auth_id.get(a).cloned())
                    .collect()
            };
            for other in indices_caps {
                self.remove(&other);
            }
        }

        stored
    }
}

trait VtimeDue {
    fn is_some_and_vtime_due(self, now: Timestamp, margin: Duration) -> bool;
}

impl VtimeDue for Option<&(Timestamp, AuthId)> {
    fn is_some_and_vtime_due(self, now: Timestamp, margin: Duration) -> bool {
        match self {
            Some((vtime, _)) => (*vtime + margin) <= now,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusex_common::{CapMode, QuotaSnapshot};

    fn sample_cap(authid: &str, inode: u64, clientid: &str) -> Cap {
        Cap {
            authid: authid.into(),
            inode: Inode(inode),
            clientid: clientid.into(),
            clientuuid: "uuid-1".into(),
            uid: 1000,
            gid: 1000,
            mode: CapMode::READ,
            vtime: Timestamp::new(1000, 0),
            quota: QuotaSnapshot::unlimited(),
            max_file_size: 0,
            errc: 0,
        }
    }

    #[test]
    fn all_caps_returns_every_stored_cap() {
        let store = CapStore::new();
        store.store(sample_cap("a1", 0x100, "c1")).unwrap();
        store.store(sample_cap("a2", 0x200, "c2")).unwrap();
        assert_eq!(store.all_caps().len(), 2);
    }

    #[test]
    fn store_then_get_round_trips() {
        let store = CapStore::new();
        let cap = store.store(sample_cap("a1", 0x100, "c1")).unwrap();
        let got = store.get(&cap.authid, false).unwrap();
        assert_eq!(got.inode, Inode(0x100));
    }

    #[test]
    fn store_then_remove_then_get_is_none() {
        let store = CapStore::new();
        let cap = store.store(sample_cap("a1", 0x100, "c1")).unwrap();
        store.remove(&cap);
        assert!(store.get(&cap.authid, false).is_none());
    }

    #[test]
    fn get_absent_with_default_returns_sentinel() {
        let store = CapStore::new();
        let got = store.get(&"missing".into(), true).unwrap();
        assert!(got.is_sentinel());
    }

    #[test]
    fn reusing_authid_under_new_inode_drops_old_binding() {
        let store = CapStore::new();
        let mut cap = sample_cap("a1", 0x100, "c1");
        store.store(cap.clone()).unwrap();
        cap.inode = Inode(0x200);
        store.store(cap).unwrap();

        // Old inode's index no longer references a1.
        let idx = store.indices.lock().unwrap();
        assert!(!idx.by_inode.contains_key(&Inode(0x100)));
        assert!(idx
            .by_inode
            .get(&Inode(0x200))
            .unwrap()
            .contains(&AuthId::from("a1")));
    }

    #[test]
    fn delete_by_inode_clears_all_caps_on_it() {
        let store = CapStore::new();
        store.store(sample_cap("a1", 0x100, "c1")).unwrap();
        store.store(sample_cap("a2", 0x100, "c2")).unwrap();
        let removed = store.delete(Inode(0x100));
        assert_eq!(removed.len(), 2);
        assert!(store.get(&"a1".into(), false).is_none());
        assert!(store.get(&"a2".into(), false).is_none());
    }

    #[test]
    fn imply_inherits_identity_binds_new_inode() {
        let store = CapStore::new();
        store.store(sample_cap("src", 0x100, "c1")).unwrap();
        let implied = store
            .imply(Inode(0x200), &"src".into(), "new".into(), Timestamp::new(0, 0), None)
            .unwrap();
        assert_eq!(implied.inode, Inode(0x200));
        assert_eq!(implied.clientid, ClientId::from("c1"));
    }

    #[test]
    fn imply_fails_silently_on_missing_source() {
        let store = CapStore::new();
        assert!(store
            .imply(Inode(0x200), &"missing".into(), "new".into(), Timestamp::new(0, 0), None)
            .is_none());
    }

    #[test]
    fn expire_due_and_pop_consume_head() {
        let store = CapStore::new();
        store.store(sample_cap("a1", 0x100, "c1")).unwrap();
        assert!(!store.expire_due(Timestamp::new(1000, 0), Duration::from_secs(60)));
        assert!(store.expire_due(Timestamp::new(1100, 0), Duration::from_secs(60)));
        let popped = store.pop().unwrap();
        assert_eq!(popped.authid, AuthId::from("a1"));
        assert!(store.get(&"a1".into(), false).is_none());
    }

    #[test]
    fn issue_only_one_returns_existing_cap() {
        let store = CapStore::new();
        let ctx = ParentContext {
            mode: 0o755,
            owner_uid: 1000,
            owner_gid: 1000,
            acl: None,
            mask: None,
            owner_auth: None,
            path_is_public: true,
            quota: None,
        };
        let identity = VirtualIdentity {
            uid: 1000,
            gid: 1000,
            sudoer: false,
            auth_scheme: "krb5",
            principal: "bob",
            privileged: false,
        };
        let first = store.issue(
            &ctx,
            &identity,
            Inode(0x100),
            &"c1".into(),
            &"uuid-1".into(),
            Timestamp::ZERO,
            None,
            true,
        );
        let second = store.issue(
            &ctx,
            &identity,
            Inode(0x100),
            &"c1".into(),
            &"uuid-1".into(),
            Timestamp::ZERO,
            None,
            true,
        );
        assert_eq!(first.authid, second.authid);
    }

    #[test]
    fn issue_without_suppression_removes_prior_cap_on_same_inode() {
        let store = CapStore::new();
        let ctx = ParentContext {
            mode: 0o755,
            owner_uid: 1000,
            owner_gid: 1000,
            acl: None,
            mask: None,
            owner_auth: None,
            path_is_public: true,
            quota: None,
        };
        let identity = VirtualIdentity {
            uid: 1000,
            gid: 1000,
            sudoer: false,
            auth_scheme: "krb5",
            principal: "bob",
            privileged: false,
        };
        let first = store.issue(
            &ctx,
            &identity,
            Inode(0x100),
            &"c1".into(),
            &"uuid-1".into(),
            Timestamp::ZERO,
            None,
            false,
        );
        let second = store.issue(
            &ctx,
            &identity,
            Inode(0x100),
            &"c1".into(),
            &"uuid-1".into(),
            Timestamp::ZERO,
            None,
            false,
        );
        assert_ne!(first.authid, second.authid);
        assert!(store.get(&first.authid, false).is_none());
        assert!(store.get(&second.authid, false).is_some());
    }
}
