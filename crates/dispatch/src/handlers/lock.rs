use fusex_common::wire::Response;

use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::op::LockArgs;

impl Dispatcher {
    /// `GETLK` (spec.md §4.4 "GETLK / SETLK / SETLKW"): a read-only probe of
    /// the byte-range lock table, no capability involved.
    pub(crate) async fn handle_getlk(&self, args: LockArgs, _transactionid: u64) -> Result<Response, DispatchError> {
        let flock = self.locks.getlk(args.inode, args.flock).await?;
        Ok(Response::Lock { flock, err_no: None })
    }

    /// `SETLK`/`SETLKW`: `wait` distinguishes the two on the wire, but both
    /// reach the same lock-service call.
    pub(crate) async fn handle_setlk(&self, args: LockArgs, _transactionid: u64) -> Result<Response, DispatchError> {
        let flock = self.locks.setlk(args.inode, args.flock, args.wait).await?;
        Ok(Response::Lock { flock, err_no: None })
    }
}
