use fusex_common::wire::{MdPayload, Response};
use fusex_common::{Errno, Timestamp};

use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::op::{GetcapArgs, RequestContext};
use crate::support::{IdentityScratch, ParentScratch};

/// Clock drift beyond which a client's announced wall clock is rejected
/// outright (spec.md §4.4 "GETCAP").
const MAX_CLOCK_SKEW_SECS: u64 = 2;

impl Dispatcher {
    /// `GETCAP` (spec.md §4.4 "GETCAP"): clock-skew rejection, then a fresh
    /// cap issuance through the same duplicate-suppressing path `GET`/`LS`
    /// use for child caps.
    pub(crate) async fn handle_getcap(
        &self,
        args: GetcapArgs,
        ctx: &RequestContext,
        _transactionid: u64,
        now: Timestamp,
    ) -> Result<Response, DispatchError> {
        if args.client_clock.sec > now.sec + MAX_CLOCK_SKEW_SECS {
            return Err(DispatchError::Errno(Errno::El2nsync));
        }

        let entry = self
            .namespace
            .get(args.inode)
            .await?
            .ok_or(DispatchError::Errno(Errno::Enoent))?;
        let context_entry = if entry.is_directory() {
            entry
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

        let cap = self.caps.issue(
            &parent_ctx,
            &identity,
            args.inode,
            &ctx.clientid,
            &ctx.clientuuid,
            now,
            None,
            true,
        );

        Ok(Response::Md(MdPayload::Cap(self.cap_body(&cap))))
    }
}
