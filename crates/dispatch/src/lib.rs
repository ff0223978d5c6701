//! Request dispatch: parses a wire [`fusex_common::wire::Request`] into a
//! tagged [`Op`], validates its capability, and drives whichever
//! `fusex_capstore`/`fusex_registry`/`fusex_broadcast` collaborator the
//! operation needs (spec.md §4.4 "Operations").

pub mod background;
pub mod config;
pub mod dispatcher;
pub mod error;
mod handlers;
pub mod op;
mod support;
pub mod validate;

pub use config::{DispatchConfig, DispatchConfigBuilder};
pub use dispatcher::Dispatcher;
pub use error::DispatchError;
pub use op::Op;
