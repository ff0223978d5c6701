//! The concrete [`BroadcastTransport`]: one outgoing queue per connected
//! `ClientId`, fed by whichever connection task currently owns that
//! client's socket.

use std::sync::Mutex;

use async_trait::async_trait;
use fusex_common::collaborators::BroadcastTransport;
use fusex_common::wire::{ServerMessage, ServerPush};
use fusex_common::ClientId;
use log::debug;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Default)]
pub struct ConnectionRegistry {
    senders: Mutex<HashMap<ClientId, UnboundedSender<ServerMessage>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, clientid: ClientId, sender: UnboundedSender<ServerMessage>) {
        self.senders.lock().expect("connection registry lock").insert(clientid, sender);
    }

    /// Removes `clientid`'s queue, but only if it still belongs to the
    /// connection that's disconnecting — a reconnect may already have
    /// replaced it by the time the old connection's teardown runs.
    pub fn unregister(&self, clientid: &ClientId, sender: &UnboundedSender<ServerMessage>) {
        let mut senders = self.senders.lock().expect("connection registry lock");
        if let Some(current) = senders.get(clientid) {
            if current.same_channel(sender) {
                senders.remove(clientid);
            }
        }
    }
}

#[async_trait]
impl BroadcastTransport for ConnectionRegistry {
    async fn send(&self, clientid: &ClientId, push: ServerPush) -> anyhow::Result<()> {
        let sender = {
            let senders = self.senders.lock().expect("connection registry lock");
            senders.get(clientid).cloned()
        };
        match sender {
            Some(sender) => sender
                .send(ServerMessage::Push(push))
                .map_err(|_| anyhow::anyhow!("client {} disconnected", clientid)),
            None => {
                debug!("no live connection for client {}, dropping push", clientid);
                Err(anyhow::anyhow!("client {} not connected", clientid))
            }
        }
    }
}
