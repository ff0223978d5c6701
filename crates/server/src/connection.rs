//! One task per accepted TCP connection: reads framed [`ClientMessage`]s,
//! drives them through the [`Dispatcher`], and writes back framed
//! [`ServerMessage`]s — both request/response replies and, interleaved,
//! any [`ServerPush`] the broadcast/CAP-monitor paths queue for this
//! client via [`ConnectionRegistry`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use fusex_common::wire::{ClientMessage, ServerMessage};
use fusex_common::{ClientId, Timestamp};
use fusex_dispatch::Dispatcher;
use fusex_registry::HeartbeatWindows;
use log::{debug, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::codec::FrameCodec;
use crate::transport::ConnectionRegistry;

/// There's no dedicated `clientid` field on a heartbeat (spec.md §6 lists
/// `host`, `uuid`, `pid`, ... but not `clientid`) — `host:pid` stands in,
/// matching the request wire's own `clientid` closely enough for the
/// registry's per-`ClientId` bookkeeping.
fn heartbeat_clientid(host: &str, pid: u32) -> ClientId {
    ClientId::from(format!("{host}:{pid}"))
}

pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    connections: Arc<ConnectionRegistry>,
    windows: HeartbeatWindows,
) {
    debug!("accepted connection from {}", peer);
    let framed = Framed::new(stream, FrameCodec);
    let (mut sink, mut source) = framed.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let transactionid = AtomicU64::new(1);
    let mut registered_as: Option<ClientId> = None;

    while let Some(frame) = source.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(err) => {
                warn!("frame error from {}: {}", peer, err);
                break;
            }
        };

        match message {
            ClientMessage::Request(req) => {
                if registered_as.as_ref() != Some(&req.clientid) {
                    connections.register(req.clientid.clone(), tx.clone());
                    registered_as = Some(req.clientid.clone());
                }

                let txid = transactionid.fetch_add(1, Ordering::Relaxed);
                let response = dispatcher.dispatch(req, txid, Timestamp::now()).await;
                if tx.send(ServerMessage::Response(response)).is_err() {
                    break;
                }
            }
            ClientMessage::Heartbeat(hb) => {
                let clientid = heartbeat_clientid(&hb.host, hb.pid);
                if registered_as.as_ref() != Some(&clientid) {
                    connections.register(clientid.clone(), tx.clone());
                    registered_as = Some(clientid.clone());
                }
                dispatcher.ingest_heartbeat(clientid, hb, Timestamp::now(), &windows).await;
            }
        }
    }

    // Cap/lock lifecycle tracks the heartbeat state machine, not the raw
    // socket (spec.md §4.2 "State machine", §6 "Persisted state") — a
    // dropped TCP connection alone doesn't evict the client or release its
    // caps; the heartbeat monitor reaps it once it stops heartbeating.
    if let Some(clientid) = registered_as {
        connections.unregister(&clientid, &tx);
    }
    writer.abort();
    debug!("connection from {} closed", peer);
}
