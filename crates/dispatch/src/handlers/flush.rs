use crate::dispatcher::{ack_ok, Dispatcher};
use crate::error::DispatchError;
use crate::op::{FlushArgs, RequestContext};

impl Dispatcher {
    /// `BEGINFLUSH` (spec.md §4.4 "BEGINFLUSH / ENDFLUSH").
    pub(crate) async fn handle_beginflush(
        &self,
        args: FlushArgs,
        ctx: &RequestContext,
        transactionid: u64,
    ) -> Result<fusex_common::wire::Response, DispatchError> {
        self.flush.begin_flush(args.inode, &ctx.clientuuid).await?;
        Ok(ack_ok(transactionid))
    }

    /// `ENDFLUSH`.
    pub(crate) async fn handle_endflush(
        &self,
        args: FlushArgs,
        ctx: &RequestContext,
        transactionid: u64,
    ) -> Result<fusex_common::wire::Response, DispatchError> {
        self.flush.end_flush(args.inode, &ctx.clientuuid).await?;
        Ok(ack_ok(transactionid))
    }
}
