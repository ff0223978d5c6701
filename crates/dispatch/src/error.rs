//! Failure-semantics translation (spec.md §7 "Error Handling Design"):
//! every fallible step a handler takes collapses to one [`Errno`] before it
//! reaches the wire.

use fusex_common::collaborators::{FlushError, LockError, NamespaceError};
use fusex_common::Errno;
use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    Errno(Errno),
    #[error(transparent)]
    Namespace(#[from] NamespaceError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Flush(#[from] FlushError),
}

impl DispatchError {
    pub fn to_errno(&self) -> Errno {
        match self {
            DispatchError::Errno(errno) => *errno,
            DispatchError::Namespace(err) => err.to_errno(),
            DispatchError::Lock(_) => Errno::Eio,
            DispatchError::Flush(_) => Errno::Eio,
        }
    }
}

impl From<Errno> for DispatchError {
    fn from(errno: Errno) -> Self {
        DispatchError::Errno(errno)
    }
}
