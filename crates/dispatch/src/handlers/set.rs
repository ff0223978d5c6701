use fusex_common::collaborators::EntryMetadata;
use fusex_common::wire::ServerPush;
use fusex_common::{CapMode, Errno, Inode, Timestamp};

use crate::dispatcher::{ack_ok, Dispatcher};
use crate::error::DispatchError;
use crate::op::{RequestContext, SetArgs};
use crate::support::{IdentityScratch, ParentScratch};

/// What `SET` resolves to once the target is matched against what the
/// namespace store already holds (spec.md §4.4 "SET sub-operations").
enum SetKind {
    Create,
    HardLinkCreate { source_inode: Inode },
    Update(Inode),
    RenameOrMove(Inode),
}

impl Dispatcher {
    /// `SET` (spec.md §4.4 "SET"): `CREATE`/`UPDATE`/`RENAME`/`MOVE`
    /// classification, `EXCL` enforcement, hard-link `CREATE` via the
    /// `////hlnk` sentinel target, and the `BroadcastMD`/`BroadcastRelease`/
    /// `BroadcastRefresh` fan-out.
    pub(crate) async fn handle_set(
        &self,
        args: SetArgs,
        ctx: &RequestContext,
        transactionid: u64,
        now: Timestamp,
    ) -> Result<fusex_common::wire::Response, DispatchError> {
        let parent_entry = self
            .namespace
            .get(args.parent_inode)
            .await?
            .ok_or(DispatchError::Errno(Errno::Enoent))?;

        let existing_by_name = self.namespace.find_child(args.parent_inode, &args.name).await?;
        let existing_by_inode = if args.inode != Inode::ZERO {
            Some(
                self.namespace
                    .get(args.inode)
                    .await?
                    .ok_or(DispatchError::Errno(Errno::Enoent))?,
            )
        } else {
            None
        };

        let kind = classify(&args, existing_by_name.as_ref(), existing_by_inode.as_ref())?;

        let target_inode = match &kind {
            SetKind::Create | SetKind::HardLinkCreate { .. } => args.parent_inode,
            SetKind::Update(inode) | SetKind::RenameOrMove(inode) => *inode,
        };

        let quota = self.quota_of(&parent_entry).await;
        let scratch = ParentScratch::from_entry(&parent_entry);
        let identity_scratch = IdentityScratch::new(ctx.uid);
        let parent_ctx = scratch.context(&parent_entry, quota);
        let identity = identity_scratch.identity(ctx.uid, ctx.gid);

        crate::validate::validate_cap(
            &self.caps,
            &ctx.authid,
            target_inode,
            args.parent_inode,
            CapMode::WRITE | CapMode::SET_XATTR,
            now,
            &parent_ctx,
            &identity,
        )?;

        match kind {
            SetKind::HardLinkCreate { source_inode } => {
                let source = self
                    .namespace
                    .get(source_inode)
                    .await?
                    .ok_or(DispatchError::Errno(Errno::Enoent))?;
                let mut linked = source.clone();
                linked.parent_inode = args.parent_inode;
                linked.name = args.name.clone();
                linked.nlink = source.nlink + 1;
                linked.attrs.insert("mdino".to_string(), source.inode.0.to_string());
                let created = self.namespace.create(linked).await?;
                self.namespace
                    .set_attr(source.inode, "nlink", &(source.nlink + 1).to_string())
                    .await?;
                self.namespace.touch_mtime(args.parent_inode, args.mtime).await?;
                self.broadcast_md(ctx, created.inode, args.parent_inode, &created).await;
                self.broadcast_md(ctx, source.inode, source.parent_inode, &source).await;
                Ok(ack_ok(transactionid))
            }
            SetKind::Create => {
                let new_entry = EntryMetadata {
                    inode: Inode::ZERO,
                    parent_inode: args.parent_inode,
                    name: args.name.clone(),
                    mode: args.mode,
                    uid: args.uid,
                    gid: args.gid,
                    size: args.size,
                    nlink: 1,
                    target: args.target.clone(),
                    ctime: args.ctime,
                    mtime: args.mtime,
                    btime: args.btime,
                    clock: 0,
                    attrs: args.attrs.clone(),
                };
                let created = self.namespace.create(new_entry).await?;
                self.namespace.touch_mtime(args.parent_inode, args.mtime).await?;
                self.broadcast_md(ctx, created.inode, args.parent_inode, &created).await;
                Ok(ack_ok(transactionid))
            }
            SetKind::Update(inode) => {
                let mut updated = existing_by_inode
                    .or(existing_by_name)
                    .ok_or(DispatchError::Errno(Errno::Enoent))?;
                updated.mode = args.mode;
                updated.uid = args.uid;
                updated.gid = args.gid;
                updated.size = args.size;
                updated.target = args.target.clone();
                updated.ctime = args.ctime;
                updated.mtime = args.mtime;
                updated.btime = args.btime;
                for (key, value) in args.attrs.clone() {
                    updated.attrs.insert(key, value);
                }
                let saved = self.namespace.update(updated).await?;
                self.namespace.touch_mtime(args.parent_inode, args.mtime).await?;
                self.broadcast_md(ctx, inode, args.parent_inode, &saved).await;
                self.broadcast_release_and_refresh(ctx, inode).await;
                Ok(ack_ok(transactionid))
            }
            SetKind::RenameOrMove(inode) => {
                if let Some(dest) = existing_by_name.as_ref() {
                    if dest.inode != inode {
                        self.namespace.delete(dest.inode).await?;
                        for cap in self.caps.delete(dest.inode) {
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
                    }
                }
                let renamed = self
                    .namespace
                    .rename(inode, args.parent_inode, args.name.clone())
                    .await?;
                self.namespace.touch_mtime(args.parent_inode, args.mtime).await?;
                self.broadcast_md(ctx, inode, args.parent_inode, &renamed).await;
                self.broadcast_release_and_refresh(ctx, inode).await;
                Ok(ack_ok(transactionid))
            }
        }
    }
}

const HARD_LINK_SENTINEL: &str = "////hlnk";

fn classify(
    args: &SetArgs,
    existing_by_name: Option<&EntryMetadata>,
    existing_by_inode: Option<&EntryMetadata>,
) -> Result<SetKind, DispatchError> {
    if let Some(suffix) = args.target.strip_prefix(HARD_LINK_SENTINEL) {
        if args.inode == Inode::ZERO {
            let source_inode: u64 = suffix.parse().map_err(|_| DispatchError::Errno(Errno::Einval))?;
            return Ok(SetKind::HardLinkCreate {
                source_inode: Inode(source_inode),
            });
        }
    }

    if args.inode == Inode::ZERO {
        match existing_by_name {
            Some(existing) => {
                if args.attrs.get("excl").map(String::as_str) == Some("1") {
                    return Err(DispatchError::Errno(Errno::Eexist));
                }
                Ok(SetKind::Update(existing.inode))
            }
            None => Ok(SetKind::Create),
        }
    } else {
        let existing = existing_by_inode.ok_or(DispatchError::Errno(Errno::Enoent))?;
        if existing.parent_inode == args.parent_inode && existing.name == args.name {
            Ok(SetKind::Update(existing.inode))
        } else {
            Ok(SetKind::RenameOrMove(existing.inode))
        }
    }
}
