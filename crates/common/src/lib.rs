//! Shared identifiers, wire message types, and the collaborator traits the
//! FuseX metadata server core delegates to (namespace store, byte-range
//! lock service, flush service, broadcast transport).

pub mod capmode;
pub mod clock;
pub mod collaborators;
pub mod errno;
pub mod ids;
pub mod version;
pub mod wire;

pub use capmode::CapMode;
pub use clock::Timestamp;
pub use collaborators::{
    BroadcastTransport, ByteRangeLockService, EntryMetadata, FlushError, FlushService, LockError,
    NamespaceError, NamespaceStore, QuotaSnapshot,
};
pub use errno::Errno;
pub use ids::{AuthId, ClientId, ClientUuid, Inode, ReqId};
pub use version::compare_versions;
