//! Traits for the collaborators spec.md §1 calls out as external to the
//! core: the namespace store, the byte-range lock service, the flush
//! service, and the broadcast transport. The core depends on these as
//! trait objects; `crates/server` wires in concrete implementations (or, in
//! tests, in-memory fakes).

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::clock::Timestamp;
use crate::errno::Errno;
use crate::ids::{ClientId, ClientUuid, Inode};
use crate::wire::{FlockRecord, ServerPush};

#[derive(Clone, Debug, Error)]
pub enum NamespaceError {
    #[error("no such entry")]
    NotFound,
    #[error("entry already exists")]
    AlreadyExists,
    #[error("directory not empty")]
    NotEmpty,
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("namespace store failure: {0}")]
    Store(String),
}

impl NamespaceError {
    /// The errno this exception taxonomy translates to at the wire
    /// (spec.md §7 "Namespace").
    pub fn to_errno(&self) -> Errno {
        match self {
            NamespaceError::NotFound => Errno::Enoent,
            NamespaceError::AlreadyExists => Errno::Eexist,
            NamespaceError::NotEmpty => Errno::Enotempty,
            NamespaceError::QuotaExceeded => Errno::Edquot,
            NamespaceError::Store(_) => Errno::Eio,
        }
    }
}

/// A quota-enabled scope's current budget, or the "effectively unlimited"
/// sentinel when the scope has no quota configured (spec.md §4.1 step 11).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct QuotaSnapshot {
    pub inode_budget: i64,
    pub volume_budget: i64,
    pub quota_node_inode: Inode,
}

impl QuotaSnapshot {
    pub const UNLIMITED_BUDGET: i64 = i64::MAX;

    pub fn unlimited() -> Self {
        Self {
            inode_budget: Self::UNLIMITED_BUDGET,
            volume_budget: Self::UNLIMITED_BUDGET,
            quota_node_inode: Inode::ZERO,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.inode_budget == Self::UNLIMITED_BUDGET && self.volume_budget == Self::UNLIMITED_BUDGET
    }
}

/// A directory or file entry as the namespace store represents it.
#[derive(Clone, Debug, Default)]
pub struct EntryMetadata {
    pub inode: Inode,
    pub parent_inode: Inode,
    pub name: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nlink: u32,
    pub target: String,
    pub ctime: Timestamp,
    pub mtime: Timestamp,
    pub btime: Timestamp,
    pub clock: u64,
    pub attrs: HashMap<String, String>,
}

impl EntryMetadata {
    pub fn is_directory(&self) -> bool {
        self.inode.is_container()
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }
}

/// The external, authoritative namespace persistence layer (spec.md §1,
/// "Out of scope"). Mutations here are transactional from the dispatcher's
/// point of view; the dispatcher traps [`NamespaceError`] and translates it
/// (spec.md §7 "Namespace").
#[async_trait]
pub trait NamespaceStore: Send + Sync {
    async fn get(&self, inode: Inode) -> Result<Option<EntryMetadata>, NamespaceError>;

    async fn list_children(&self, dir_inode: Inode) -> Result<Vec<EntryMetadata>, NamespaceError>;

    async fn find_child(
        &self,
        parent: Inode,
        name: &str,
    ) -> Result<Option<EntryMetadata>, NamespaceError>;

    async fn create(&self, entry: EntryMetadata) -> Result<EntryMetadata, NamespaceError>;

    async fn update(&self, entry: EntryMetadata) -> Result<EntryMetadata, NamespaceError>;

    async fn rename(
        &self,
        inode: Inode,
        new_parent: Inode,
        new_name: String,
    ) -> Result<EntryMetadata, NamespaceError>;

    async fn delete(&self, inode: Inode) -> Result<(), NamespaceError>;

    async fn set_attr(&self, inode: Inode, key: &str, value: &str) -> Result<(), NamespaceError>;

    async fn touch_mtime(&self, inode: Inode, mtime: Timestamp) -> Result<(), NamespaceError>;

    async fn quota_for(
        &self,
        uid: u32,
        gid: u32,
        quota_node: Inode,
    ) -> Result<QuotaSnapshot, NamespaceError>;
}

#[derive(Clone, Debug, Error)]
pub enum LockError {
    #[error("lock service unavailable: {0}")]
    Unavailable(String),
}

/// The byte-range lock auxiliary service (spec.md §3 "Byte-range locks",
/// §4.4 "GETLK / SETLK / SETLKW").
#[async_trait]
pub trait ByteRangeLockService: Send + Sync {
    async fn getlk(&self, inode: Inode, req: FlockRecord) -> Result<FlockRecord, LockError>;

    async fn setlk(
        &self,
        inode: Inode,
        req: FlockRecord,
        wait: bool,
    ) -> Result<FlockRecord, LockError>;

    /// Drop every lock held by `uuid`, anywhere (spec.md §4.2 state machine
    /// VOLATILE→OFFLINE and OFFLINE→EVICTED edges; §4.2 `Evict`).
    async fn drop_locks_for_uuid(&self, uuid: &ClientUuid);
}

#[derive(Clone, Debug, Error)]
pub enum FlushError {
    #[error("flush service unavailable: {0}")]
    Unavailable(String),
}

/// The flush auxiliary service (spec.md §4.4 "BEGINFLUSH / ENDFLUSH").
#[async_trait]
pub trait FlushService: Send + Sync {
    async fn begin_flush(&self, inode: Inode, uuid: &ClientUuid) -> Result<(), FlushError>;

    async fn end_flush(&self, inode: Inode, uuid: &ClientUuid) -> Result<(), FlushError>;
}

/// Point-to-point delivery to a connected client, keyed by `ClientId`.
/// Broadcast fan-out (audience selection, suppression) lives in
/// `fusex-broadcast`; this trait is only the "send one message to one
/// client" primitive that the broadcast engine and client registry both
/// drive.
#[async_trait]
pub trait BroadcastTransport: Send + Sync {
    /// Best-effort delivery. A transport error is logged and swallowed by
    /// the caller — "per-broadcast errno clobbering from the transport
    /// layer is explicitly masked" (spec.md §4.3 "Dispatch") — and never
    /// surfaced as a request failure.
    async fn send(&self, clientid: &ClientId, push: ServerPush) -> anyhow::Result<()>;
}
