//! Dispatch: takes an already-selected audience (or a single target) and
//! pushes a message through the [`BroadcastTransport`] collaborator,
//! best-effort (spec.md §4.3 "Dispatch", §4.2 "Broadcast helpers").

use std::sync::atomic::{AtomicU64, Ordering};

use fusex_capstore::Cap;
use fusex_common::version::version_less_than;
use fusex_common::wire::ServerPush;
use fusex_common::{BroadcastTransport, ClientId};
use log::debug;

use crate::audience::AudienceResult;

/// Client versions strictly below this are silenced for refresh-entry
/// pushes only (spec.md §4.2 `SendMD`).
pub const REFRESH_SILENCED_BELOW_VERSION: &str = "4.4.18";

#[derive(Default)]
pub struct BroadcastEngine {
    suppressed_total: AtomicU64,
}

impl BroadcastEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suppressed_total(&self) -> u64 {
        self.suppressed_total.load(Ordering::Relaxed)
    }

    /// Sends `push` to a single client, ignoring the outcome beyond a debug
    /// log — "emission is best-effort" (spec.md §4.3).
    pub async fn send_to_client(
        &self,
        transport: &dyn BroadcastTransport,
        clientid: &ClientId,
        push: ServerPush,
    ) -> bool {
        match transport.send(clientid, push).await {
            Ok(()) => true,
            Err(err) => {
                debug!("broadcast to {clientid} failed (best-effort, ignored): {err}");
                false
            }
        }
    }

    /// `SendMD`'s version-gated silencing: a refresh-entry push is dropped
    /// outright for clients below [`REFRESH_SILENCED_BELOW_VERSION`].
    pub async fn send_md_refresh_aware(
        &self,
        transport: &dyn BroadcastTransport,
        clientid: &ClientId,
        client_version: &str,
        push: ServerPush,
        is_refresh_only: bool,
    ) -> bool {
        if is_refresh_only && version_less_than(client_version, REFRESH_SILENCED_BELOW_VERSION) {
            debug!("refresh entry to {clientid} silenced for client version {client_version}");
            return false;
        }
        self.send_to_client(transport, clientid, push).await
    }

    /// Fans `push` out to every recipient in `audience`, cloning it per
    /// send (each [`ServerPush`] send is independent and best-effort), and
    /// folds `audience.suppressed` into the running suppression counter
    /// (spec.md §4.3 "accumulated suppression count is reported to the
    /// statistics subsystem").
    pub async fn send_to_audience(
        &self,
        transport: &dyn BroadcastTransport,
        audience: AudienceResult,
        push: ServerPush,
    ) -> usize {
        self.suppressed_total
            .fetch_add(audience.suppressed as u64, Ordering::Relaxed);

        let mut sent = 0;
        for cap in &audience.recipients {
            if self
                .send_to_client(transport, &cap.clientid, push.clone())
                .await
            {
                sent += 1;
            }
        }
        sent
    }

    /// `ReleaseCAP`/`DeleteEntry`/`RefreshEntry` point-to-point
    /// notifications keyed directly by a single cap's owning client
    /// (spec.md §4.2).
    pub async fn notify_owner(
        &self,
        transport: &dyn BroadcastTransport,
        cap: &Cap,
        push: ServerPush,
    ) -> bool {
        self.send_to_client(transport, &cap.clientid, push).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fusex_common::wire::ServerPush;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<ClientId>>,
        fail_for: Option<ClientId>,
    }

    #[async_trait]
    impl BroadcastTransport for RecordingTransport {
        async fn send(&self, clientid: &ClientId, _push: ServerPush) -> anyhow::Result<()> {
            if self.fail_for.as_ref() == Some(clientid) {
                anyhow::bail!("simulated transport failure");
            }
            self.sent.lock().unwrap().push(clientid.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn send_to_audience_counts_successes_and_suppressions() {
        let transport = RecordingTransport::default();
        let engine = BroadcastEngine::new();
        let audience = AudienceResult {
            recipients: vec![],
            suppressed: 3,
        };
        let sent = engine
            .send_to_audience(&transport, audience, ServerPush::Dropcaps)
            .await;
        assert_eq!(sent, 0);
        assert_eq!(engine.suppressed_total(), 3);
    }

    #[tokio::test]
    async fn refresh_only_push_is_silenced_for_old_clients() {
        let transport = RecordingTransport::default();
        let engine = BroadcastEngine::new();
        let sent = engine
            .send_md_refresh_aware(
                &transport,
                &ClientId::from("c1"),
                "4.4.17",
                ServerPush::Refresh { md_ino: fusex_common::Inode(1) },
                true,
            )
            .await;
        assert!(!sent);
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh_only_push_reaches_current_clients() {
        let transport = RecordingTransport::default();
        let engine = BroadcastEngine::new();
        let sent = engine
            .send_md_refresh_aware(
                &transport,
                &ClientId::from("c1"),
                "4.5.0",
                ServerPush::Refresh { md_ino: fusex_common::Inode(1) },
                true,
            )
            .await;
        assert!(sent);
    }

    #[tokio::test]
    async fn best_effort_send_ignores_transport_errors() {
        let transport = RecordingTransport {
            fail_for: Some(ClientId::from("c1")),
            ..Default::default()
        };
        let engine = BroadcastEngine::new();
        let ok = engine
            .send_to_client(&transport, &ClientId::from("c1"), ServerPush::Dropcaps)
            .await;
        assert!(!ok);
    }
}
