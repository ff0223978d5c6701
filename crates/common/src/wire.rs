//! Wire message shapes (spec.md §6 "External Interfaces"). The concrete
//! framing/codec lives in `crates/server` (see `SPEC_FULL.md` §3); this
//! module only defines the structured payloads that framing carries.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::capmode::CapMode;
use crate::clock::Timestamp;
use crate::errno::Errno;
use crate::ids::{AuthId, ClientId, ClientUuid, Inode, ReqId};

/// Request operation codes (spec.md §4.4 "Operation codes").
#[derive(
    AsRefStr, Clone, Copy, Debug, Deserialize, Display, EnumString, Eq, Hash, PartialEq, Serialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OpCode {
    Beginflush,
    Endflush,
    Get,
    Ls,
    Set,
    Delete,
    Getcap,
    Getlk,
    Setlk,
    Setlkw,
}

/// A byte-range lock descriptor, carried on `GETLK`/`SETLK`/`SETLKW` and
/// returned in `Response::Lock`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct FlockRecord {
    pub lock_type: LockType,
    pub start: u64,
    /// `0` is re-encoded to [`INFINITE_RANGE`] before reaching the lock
    /// service (spec.md §4.4 "GETLK / SETLK / SETLKW").
    pub len: i64,
    pub pid: u32,
}

/// Sentinel length meaning "to end of file", per spec.md §4.4.
pub const INFINITE_RANGE: i64 = -1;

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum LockType {
    #[default]
    Unlock,
    Read,
    Write,
}

/// A client request, as decoded off the wire.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Request {
    pub op: OpCode,
    pub inode: Inode,
    pub parent_inode: Inode,
    pub name: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub clientid: ClientId,
    pub clientuuid: ClientUuid,
    pub authid: AuthId,
    pub reqid: ReqId,
    pub ctime: Timestamp,
    pub mtime: Timestamp,
    pub btime: Timestamp,
    pub attrs: HashMap<String, String>,
    pub size: u64,
    /// Symlink target, or (for hard-link create) the sentinel
    /// `////hlnk<decimal inode>` (spec.md §4.4 "Hard-link CREATE").
    pub target: String,
    pub flock: Option<FlockRecord>,
    /// Client-known change clock for the `GET`/`LS` "not modified" fast path.
    pub known_clock: Option<u64>,
    /// App tag, consulted for the `MAX_CHILDREN` exemption.
    pub app_tag: Option<String>,
    /// Client-observed wall clock, used for `GETCAP` skew detection.
    pub client_clock: Timestamp,
    pub sleep: bool,
}

/// A response ACK status code.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
pub enum AckCode {
    Ok,
    NotModified,
    PermanentFailure,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Ack {
    pub code: AckCode,
    pub err_no: Option<Errno>,
    pub err_msg: Option<String>,
    pub transactionid: u64,
    pub md_ino: Option<Inode>,
}

impl Ack {
    pub fn ok(transactionid: u64) -> Self {
        Self {
            code: AckCode::Ok,
            err_no: None,
            err_msg: None,
            transactionid,
            md_ino: None,
        }
    }

    pub fn not_modified(transactionid: u64) -> Self {
        Self {
            code: AckCode::NotModified,
            err_no: None,
            err_msg: None,
            transactionid,
            md_ino: None,
        }
    }

    pub fn error(transactionid: u64, err_no: Errno, err_msg: impl Into<String>) -> Self {
        Self {
            code: AckCode::PermanentFailure,
            err_no: Some(err_no),
            err_msg: Some(err_msg.into()),
            transactionid,
            md_ino: None,
        }
    }
}

/// A single metadata entry as sent over the wire, paired with an optional
/// capability for up to 16 dot-prefixed children (spec.md §4.4 "GET / LS").
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MdEntry {
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
    pub capability: Option<CapBody>,
}

/// A capability as serialized for the wire.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CapBody {
    pub authid: AuthId,
    pub inode: Inode,
    pub clientid: ClientId,
    pub clientuuid: ClientUuid,
    pub uid: u32,
    pub gid: u32,
    pub mode: CapMode,
    pub vtime: Timestamp,
    pub quota_inodes: i64,
    pub quota_bytes: i64,
    pub quota_node_inode: Inode,
    pub max_file_size: u64,
    pub errc: i32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum MdPayload {
    Entry(MdEntry),
    Listing(Vec<MdEntry>),
    Map(HashMap<String, MdEntry>),
    Cap(CapBody),
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum Response {
    Ack(Ack),
    Md(MdPayload),
    Lock {
        flock: FlockRecord,
        err_no: Option<Errno>,
    },
    None,
}

/// A client's heartbeat (spec.md §6 "Heartbeat message").
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Heartbeat {
    pub host: String,
    pub uuid: ClientUuid,
    pub pid: u32,
    pub start_time: Timestamp,
    pub mount_kind: MountKind,
    pub protocol_version: String,
    pub lease_time: Option<u64>,
    pub shutdown: bool,
    pub clock: Timestamp,
    pub log_payload: Vec<u8>,
    pub trace_payload: Vec<u8>,
    pub revoke: HashMap<AuthId, RevokeRequest>,
    pub ops_count: u64,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum MountKind {
    #[default]
    Static,
    Autofs,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RevokeRequest {
    pub reason: String,
}

/// Server-initiated, point-to-point or broadcast pushes (spec.md §6
/// "Server-initiated messages").
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum ServerPush {
    Evict {
        reason: String,
    },
    Dropcaps,
    Config {
        hbrate: u64,
        dentrymessaging: bool,
        writesizeflush: bool,
        appname: String,
        mdquery: bool,
        hideversion: bool,
        serverversion: String,
    },
    Cap(CapBody),
    Md {
        md: MdEntry,
        clientid: ClientId,
        md_ino: Inode,
        md_pino: Inode,
        clock: u64,
        pt_mtime: Option<Timestamp>,
    },
    ReleaseCap {
        md_ino: Inode,
        clientid: ClientId,
    },
    DentryRemove {
        name: String,
        md_ino: Inode,
        clientid: ClientId,
    },
    Refresh {
        md_ino: Inode,
    },
}

/// What a client can send in on one connection (spec.md §6 "External
/// Interfaces" describes the request/response wire and the heartbeat
/// message as two distinct shapes sharing one transport; this tags them for
/// the framing codec in `crates/server`, see `SPEC_FULL.md` §3).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum ClientMessage {
    Request(Request),
    Heartbeat(Heartbeat),
}

/// The other direction: a reply to one request, or an out-of-band push,
/// sharing the same framed connection (see [`ClientMessage`]).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum ServerMessage {
    Response(Response),
    Push(ServerPush),
}
