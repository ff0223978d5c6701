//! This is the main library interface for the FuseX metadata server core:
//! config, logging, the wire codec, the per-connection task loop, and the
//! `Server` that ties them together around a `fusex_dispatch::Dispatcher`.

mod codec;
pub mod config;
mod connection;
pub mod error;
mod fakes;
mod server;
mod transport;

pub use config::Config;
pub use server::Server;

/// Test-only seams so `tests/roundtrip.rs` can drive the real accept-loop
/// codepath (`connection::handle_connection`) without going through
/// `Server::start`'s signal handling.
#[doc(hidden)]
pub mod fakes_for_tests {
    pub use crate::fakes::{InMemoryFlush, InMemoryLocks, InMemoryNamespace};
}

#[doc(hidden)]
pub mod connection_registry_for_tests {
    pub use crate::transport::ConnectionRegistry;
}

#[doc(hidden)]
pub use crate::connection::handle_connection as handle_connection_for_tests;
