use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::crate_name;
use fusex_broadcast::BroadcastEngine;
use fusex_capstore::CapStore;
use fusex_dispatch::{background, Dispatcher};
use fusex_registry::ClientRegistry;
use log::info;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

use crate::config::Config;
use crate::connection::handle_connection;
use crate::fakes::{InMemoryFlush, InMemoryLocks, InMemoryNamespace};
use crate::transport::ConnectionRegistry;

/// `Server` is the main instance that runs the FuseX metadata server core.
pub struct Server {
    config: Config,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        Server { config }
    }

    /// Start the server: binds the TCP listener, wires up the dispatcher and
    /// its collaborators, spawns the background loops, and accepts
    /// connections until a termination signal arrives.
    pub async fn start(self) -> Result<()> {
        self.set_logging_verbosity().context("set logging verbosity")?;

        let windows = self.config.heartbeat_windows();
        let dispatch_config = self.config.dispatch_config();

        let namespace = Arc::new(InMemoryNamespace::new());
        let locks = Arc::new(InMemoryLocks::new());
        let flush = Arc::new(InMemoryFlush::new());
        let connections = Arc::new(ConnectionRegistry::new());
        let caps = Arc::new(CapStore::new());
        let registry = Arc::new(ClientRegistry::new());
        let broadcast = Arc::new(BroadcastEngine::new());

        let dispatcher = Arc::new(Dispatcher::new(
            namespace,
            locks,
            flush,
            connections.clone(),
            caps,
            registry,
            broadcast,
            dispatch_config,
        ));

        let listener = TcpListener::bind(self.config.bind_addr())
            .await
            .with_context(|| format!("bind {}", self.config.bind_addr()))?;
        info!("fusexd listening on {}", self.config.bind_addr());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let heartbeat_monitor = tokio::spawn(background::run_heartbeat_monitor(
            dispatcher.clone(),
            windows.clone(),
            shutdown_rx.clone(),
        ));
        let cap_monitor = tokio::spawn(background::run_cap_monitor(dispatcher.clone(), shutdown_rx.clone()));

        let mut shutdown_terminate = signal(SignalKind::terminate())?;
        let mut shutdown_interrupt = signal(SignalKind::interrupt())?;

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            log::warn!("accept failed: {}", err);
                            continue;
                        }
                    };
                    let dispatcher = dispatcher.clone();
                    let connections = connections.clone();
                    let windows = windows.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer, dispatcher, connections, windows).await;
                    });
                }
                _ = shutdown_interrupt.recv() => {
                    info!("got interrupt signal, shutting down server");
                    break;
                }
                _ = shutdown_terminate.recv() => {
                    info!("got termination signal, shutting down server");
                    break;
                }
            }
        }

        let _ = shutdown_tx.send(true);
        let _ = heartbeat_monitor.await;
        let _ = cap_monitor.await;

        self.cleanup()
    }

    /// Initialize the logger and set the verbosity to the provided level.
    fn set_logging_verbosity(&self) -> Result<()> {
        env::set_var("RUST_LOG", format!("{}={}", crate_name!(), self.config.log_level()));
        env_logger::try_init().context("init env logger")
    }

    /// Cleanup the server and persist any data if necessary.
    fn cleanup(self) -> Result<()> {
        log::debug!("cleaning up server");
        Ok(())
    }
}
