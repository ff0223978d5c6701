use fusex_common::wire::ServerPush;
use fusex_common::{CapMode, Errno, Timestamp};

use crate::dispatcher::{ack_ok, Dispatcher};
use crate::error::DispatchError;
use crate::op::{DeleteArgs, RequestContext};
use crate::support::{IdentityScratch, ParentScratch};

impl Dispatcher {
    /// `DELETE` (spec.md §4.4 "DELETE"): `ENOTEMPTY` for a non-empty
    /// directory, hard-link `nlink` decrement (unlinking the backing inode
    /// when it reaches zero), and the `BroadcastRelease`/
    /// `BroadcastDentryRemove`/`BroadcastRefresh` fan-out.
    pub(crate) async fn handle_delete(
        &self,
        args: DeleteArgs,
        ctx: &RequestContext,
        transactionid: u64,
        now: Timestamp,
    ) -> Result<fusex_common::wire::Response, DispatchError> {
        let entry = self
            .namespace
            .get(args.inode)
            .await?
            .ok_or(DispatchError::Errno(Errno::Enoent))?;

        if entry.is_directory() {
            let children = self.namespace.list_children(args.inode).await?;
            if !children.is_empty() {
                return Err(DispatchError::Errno(Errno::Enotempty));
            }
        }

        let parent_inode = if args.parent_inode == fusex_common::Inode::ZERO {
            entry.parent_inode
        } else {
            args.parent_inode
        };
        let parent_entry = self
            .namespace
            .get(parent_inode)
            .await?
            .ok_or(DispatchError::Errno(Errno::Enoent))?;

        let quota = self.quota_of(&parent_entry).await;
        let scratch = ParentScratch::from_entry(&parent_entry);
        let identity_scratch = IdentityScratch::new(ctx.uid);
        let parent_ctx = scratch.context(&parent_entry, quota);
        let identity = identity_scratch.identity(ctx.uid, ctx.gid);

        crate::validate::validate_cap(
            &self.caps,
            &ctx.authid,
            args.inode,
            parent_inode,
            CapMode::DELETE,
            now,
            &parent_ctx,
            &identity,
        )?;

        self.namespace.delete(args.inode).await?;

        if let Some(backing) = entry
            .attr("mdino")
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(fusex_common::Inode)
        {
            if let Some(backing_entry) = self.namespace.get(backing).await? {
                let remaining = backing_entry.nlink.saturating_sub(1);
                if remaining == 0 {
                    self.namespace.delete(backing).await?;
                    for cap in self.caps.delete(backing) {
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
                } else {
                    self.namespace
                        .set_attr(backing, "nlink", &remaining.to_string())
                        .await?;
                }
            }
        }

        self.namespace.touch_mtime(parent_inode, now).await?;

        for cap in self.caps.delete(args.inode) {
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

        self.broadcast_dentry_remove(ctx, parent_inode, args.inode, &entry.name).await;

        Ok(ack_ok(transactionid))
    }
}
