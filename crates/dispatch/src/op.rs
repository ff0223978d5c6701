//! The tagged-variant request type DESIGN NOTES (spec.md §9) calls for:
//! one `match` point instead of scattering `if req.op == OpCode::X` checks
//! across the dispatcher.

use fusex_common::wire::{FlockRecord, OpCode, Request};
use fusex_common::{AuthId, ClientId, ClientUuid, Errno, Inode, ReqId, Timestamp};
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct RequestContext {
    pub clientid: ClientId,
    pub clientuuid: ClientUuid,
    pub authid: AuthId,
    pub reqid: ReqId,
    pub uid: u32,
    pub gid: u32,
}

#[derive(Clone, Debug)]
pub struct GetArgs {
    pub inode: Inode,
    pub known_clock: Option<u64>,
    pub app_tag: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SetArgs {
    pub inode: Inode,
    pub parent_inode: Inode,
    pub name: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub ctime: Timestamp,
    pub mtime: Timestamp,
    pub btime: Timestamp,
    pub attrs: HashMap<String, String>,
    pub size: u64,
    pub target: String,
}

#[derive(Clone, Debug)]
pub struct DeleteArgs {
    pub inode: Inode,
    pub parent_inode: Inode,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct GetcapArgs {
    pub inode: Inode,
    pub client_clock: Timestamp,
}

#[derive(Clone, Debug)]
pub struct LockArgs {
    pub inode: Inode,
    pub flock: FlockRecord,
    pub wait: bool,
}

#[derive(Clone, Debug)]
pub struct FlushArgs {
    pub inode: Inode,
}

#[derive(Clone, Debug)]
pub enum Op {
    Get(GetArgs),
    Ls(GetArgs),
    Set(SetArgs),
    Delete(DeleteArgs),
    Getcap(GetcapArgs),
    Getlk(LockArgs),
    Setlk(LockArgs),
    Setlkw(LockArgs),
    Beginflush(FlushArgs),
    Endflush(FlushArgs),
}

impl Op {
    /// Parses and lightly validates `req` into a tagged [`Op`], rejecting
    /// structurally impossible requests before any capability is consulted
    /// (spec.md §4.4: "a malformed request is rejected before capability
    /// lookup, not after").
    pub fn from_request(req: &Request) -> Result<Op, Errno> {
        match req.op {
            OpCode::Get => Ok(Op::Get(get_args(req))),
            OpCode::Ls => Ok(Op::Ls(get_args(req))),
            OpCode::Set => {
                if req.parent_inode == Inode::ZERO && req.inode == Inode::ZERO {
                    return Err(Errno::Einval);
                }
                Ok(Op::Set(SetArgs {
                    inode: req.inode,
                    parent_inode: req.parent_inode,
                    name: req.name.clone(),
                    mode: req.mode,
                    uid: req.uid,
                    gid: req.gid,
                    ctime: req.ctime,
                    mtime: req.mtime,
                    btime: req.btime,
                    attrs: req.attrs.clone(),
                    size: req.size,
                    target: req.target.clone(),
                }))
            }
            OpCode::Delete => {
                if req.inode == Inode::ZERO {
                    return Err(Errno::Einval);
                }
                Ok(Op::Delete(DeleteArgs {
                    inode: req.inode,
                    parent_inode: req.parent_inode,
                    name: req.name.clone(),
                }))
            }
            OpCode::Getcap => {
                if req.inode == Inode::ZERO {
                    return Err(Errno::Einval);
                }
                Ok(Op::Getcap(GetcapArgs {
                    inode: req.inode,
                    client_clock: req.client_clock,
                }))
            }
            OpCode::Getlk | OpCode::Setlk | OpCode::Setlkw => {
                let mut flock = req.flock.clone().ok_or(Errno::Einval)?;
                if flock.len == 0 {
                    flock.len = fusex_common::wire::INFINITE_RANGE;
                }
                let args = LockArgs {
                    inode: req.inode,
                    flock,
                    wait: req.sleep,
                };
                Ok(match req.op {
                    OpCode::Getlk => Op::Getlk(args),
                    OpCode::Setlk => Op::Setlk(args),
                    _ => Op::Setlkw(args),
                })
            }
            OpCode::Beginflush => Ok(Op::Beginflush(FlushArgs { inode: req.inode })),
            OpCode::Endflush => Ok(Op::Endflush(FlushArgs { inode: req.inode })),
        }
    }
}

fn get_args(req: &Request) -> GetArgs {
    GetArgs {
        inode: req.inode,
        known_clock: req.known_clock,
        app_tag: req.app_tag.clone(),
    }
}

pub fn context_of(req: &Request) -> RequestContext {
    RequestContext {
        clientid: req.clientid.clone(),
        clientuuid: req.clientuuid.clone(),
        authid: req.authid.clone(),
        reqid: req.reqid.clone(),
        uid: req.uid,
        gid: req.gid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusex_common::wire::LockType;
    use std::collections::HashMap as Map;

    fn base_request(op: OpCode) -> Request {
        Request {
            op,
            inode: Inode(0x100),
            parent_inode: Inode(0x200),
            name: "file".into(),
            mode: 0o644,
            uid: 1000,
            gid: 1000,
            clientid: "c1".into(),
            clientuuid: "u1".into(),
            authid: "a1".into(),
            reqid: "r1".into(),
            ctime: Timestamp::ZERO,
            mtime: Timestamp::ZERO,
            btime: Timestamp::ZERO,
            attrs: Map::new(),
            size: 0,
            target: String::new(),
            flock: None,
            known_clock: None,
            app_tag: None,
            client_clock: Timestamp::ZERO,
            sleep: false,
        }
    }

    #[test]
    fn set_with_no_inode_and_no_parent_is_rejected() {
        let mut req = base_request(OpCode::Set);
        req.inode = Inode::ZERO;
        req.parent_inode = Inode::ZERO;
        assert!(matches!(Op::from_request(&req), Err(Errno::Einval)));
    }

    #[test]
    fn lock_without_flock_record_is_rejected() {
        let req = base_request(OpCode::Getlk);
        assert!(matches!(Op::from_request(&req), Err(Errno::Einval)));
    }

    #[test]
    fn zero_length_lock_is_reencoded_to_infinite_range() {
        let mut req = base_request(OpCode::Setlk);
        req.flock = Some(FlockRecord {
            lock_type: LockType::Write,
            start: 0,
            len: 0,
            pid: 1,
        });
        match Op::from_request(&req).unwrap() {
            Op::Setlk(args) => assert_eq!(args.flock.len, fusex_common::wire::INFINITE_RANGE),
            other => panic!("unexpected op: {other:?}"),
        }
    }

    #[test]
    fn setlkw_carries_the_sleep_flag_as_wait() {
        let mut req = base_request(OpCode::Setlkw);
        req.sleep = true;
        req.flock = Some(FlockRecord {
            lock_type: LockType::Write,
            start: 0,
            len: 10,
            pid: 1,
        });
        match Op::from_request(&req).unwrap() {
            Op::Setlkw(args) => assert!(args.wait),
            other => panic!("unexpected op: {other:?}"),
        }
    }
}
