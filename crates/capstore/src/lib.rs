//! The capability store: the authoritative in-memory directory of currently
//! valid caps, and the derivation engine that turns a
//! `(container-metadata, client-identity, parent-ACL)` tuple into a
//! capability mode bitmask (spec.md §4.1).

pub mod acl;
pub mod derive;
pub mod error;
pub mod store;

pub use acl::{Acl, AclEntry, AclSubject};
pub use derive::{
    derive_cap_mode, evaluate_parent_permission, CapDerivation, ParentContext, VirtualIdentity,
};
pub use error::CapStoreError;
pub use store::CapStore;

use fusex_common::{AuthId, CapMode, ClientId, ClientUuid, Inode, QuotaSnapshot, Timestamp};

/// An immutable, issued capability (spec.md §3 "Capability"). Once stored
/// under `authid`, `inode` does not change for the lifetime of that
/// `authid` — a re-presented `authid` bound to a different inode causes the
/// old cap to be removed before the new one is installed (see
/// [`CapStore::store`]).
#[derive(Clone, Debug)]
pub struct Cap {
    pub authid: AuthId,
    pub inode: Inode,
    pub clientid: ClientId,
    pub clientuuid: ClientUuid,
    pub uid: u32,
    pub gid: u32,
    pub mode: CapMode,
    pub vtime: Timestamp,
    pub quota: QuotaSnapshot,
    pub max_file_size: u64,
    pub errc: i32,
}

impl Cap {
    /// Sentinel "absent" cap returned by `Get(authid, make_default=true)`
    /// when nothing is stored under `authid`.
    pub fn sentinel() -> Self {
        Self {
            authid: AuthId::default(),
            inode: Inode::ZERO,
            clientid: ClientId::default(),
            clientuuid: ClientUuid::default(),
            uid: 0,
            gid: 0,
            mode: CapMode::empty(),
            vtime: Timestamp::ZERO,
            quota: QuotaSnapshot::unlimited(),
            max_file_size: 0,
            errc: 0,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.inode == Inode::ZERO
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.vtime <= now
    }
}
