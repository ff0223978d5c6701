use fusex_common::collaborators::EntryMetadata;
use fusex_common::wire::{CapBody, MdEntry, MdPayload, Response};
use fusex_common::{CapMode, Errno, Timestamp};

use crate::dispatcher::{not_modified, Dispatcher};
use crate::error::DispatchError;
use crate::op::{GetArgs, RequestContext};
use crate::support::{IdentityScratch, ParentScratch};

impl Dispatcher {
    /// `GET`/`LS` (spec.md §4.4 "GET / LS"): the `known_clock` "not
    /// modified" fast path, `MAX_CHILDREN` enforcement with the app-tag
    /// exemption, and up to 16 dot-prefixed children getting an attached
    /// child capability.
    pub(crate) async fn handle_get(
        &self,
        args: GetArgs,
        ctx: &RequestContext,
        transactionid: u64,
        now: Timestamp,
        is_listing: bool,
    ) -> Result<Response, DispatchError> {
        let entry = self
            .namespace
            .get(args.inode)
            .await?
            .ok_or(DispatchError::Errno(Errno::Enoent))?;

        if let Some(known) = args.known_clock {
            if known == entry.clock {
                return Ok(not_modified(transactionid));
            }
        }

        let context_entry = if entry.is_directory() {
            entry.clone()
        } else {
            self.namespace
                .get(entry.parent_inode)
                .await?
                .ok_or(DispatchError::Errno(Errno::Enoent))?
        };

        let quota = self.quota_of(&context_entry).await;
        let scratch = ParentScratch::from_entry(&context_entry);
        let identity_scratch = IdentityScratch::new(ctx.uid);
        let parent_ctx = scratch.context(&context_entry, quota);
        let identity = identity_scratch.identity(ctx.uid, ctx.gid);

        let cap = crate::validate::validate_cap(
            &self.caps,
            &ctx.authid,
            args.inode,
            context_entry.inode,
            CapMode::READ,
            now,
            &parent_ctx,
            &identity,
        )?;

        if !is_listing {
            let capability = cap.map(|c| self.cap_body(&c));
            return Ok(Response::Md(MdPayload::Entry(entry_to_md(&entry, capability))));
        }

        let children = self.namespace.list_children(args.inode).await?;
        let exempt = args.app_tag.is_some();
        if !exempt && children.len() > self.config.max_children() {
            return Err(DispatchError::Errno(Errno::Enametoolong));
        }

        let mut dot_children_capped = 0usize;
        let mut listing = Vec::with_capacity(children.len());
        for child in children {
            let capability = if child.name.starts_with('.') && dot_children_capped < 16 {
                dot_children_capped += 1;
                let child_quota = self.quota_of(&child).await;
                let child_scratch = ParentScratch::from_entry(&entry);
                let child_ctx = child_scratch.context(&entry, child_quota);
                let child_cap = self.caps.issue(
                    &child_ctx,
                    &identity,
                    child.inode,
                    &ctx.clientid,
                    &ctx.clientuuid,
                    now,
                    None,
                    true,
                );
                Some(self.cap_body(&child_cap))
            } else {
                None
            };
            listing.push(entry_to_md(&child, capability));
        }

        Ok(Response::Md(MdPayload::Listing(listing)))
    }
}

pub(crate) fn entry_to_md(entry: &EntryMetadata, capability: Option<CapBody>) -> MdEntry {
    MdEntry {
        inode: entry.inode,
        parent_inode: entry.parent_inode,
        name: entry.name.clone(),
        mode: entry.mode,
        uid: entry.uid,
        gid: entry.gid,
        size: entry.size,
        nlink: entry.nlink,
        target: entry.target.clone(),
        ctime: entry.ctime,
        mtime: entry.mtime,
        btime: entry.btime,
        clock: entry.clock,
        attrs: entry.attrs.clone(),
        capability,
    }
}
