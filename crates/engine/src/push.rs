//! Lazily-opened push channel.
//!
//! [`PushChannel::run`] keeps a single WebSocket connection open while at
//! least one job is tracked (queued or processing) and closes it once none
//! remain. Drops are retried with exponential backoff for as long as jobs
//! stay tracked; the poll reconciler covers the gaps in the meantime.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::{PushClient, PushConnection};
use crate::processor::{process_messages, SessionEnd};
use crate::reconnect::{reconnect_loop, ReconnectConfig};
use crate::store::JobStore;

pub struct PushChannel {
    client: PushClient,
    store: Arc<JobStore>,
    reconnect: ReconnectConfig,
    connected: watch::Sender<bool>,
}

impl PushChannel {
    pub fn new(client: PushClient, store: Arc<JobStore>, reconnect: ReconnectConfig) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            client,
            store,
            reconnect,
            connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Supervise the connection until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut tracked = self.store.watch_tracked();
        tracing::info!(ws_url = %self.client.ws_url(), "Push channel supervisor started");

        loop {
            // Idle until at least one job needs live updates.
            while *tracked.borrow_and_update() == 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Push channel supervisor stopping");
                        return;
                    }
                    changed = tracked.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }

            let session = cancel.child_token();
            let idle_watch = tokio::spawn(cancel_when_idle(
                self.store.watch_tracked(),
                session.clone(),
            ));

            self.run_session(&session).await;

            session.cancel();
            idle_watch.abort();

            if cancel.is_cancelled() {
                tracing::info!("Push channel supervisor stopping");
                return;
            }
        }
    }

    /// Connect, process, reconnect, until the session is cancelled.
    async fn run_session(&self, session: &CancellationToken) {
        let first = tokio::select! {
            _ = session.cancelled() => return,
            result = self.client.connect() => result,
        };
        let mut conn = match first {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "Push channel connect failed, entering reconnect loop");
                match reconnect_loop(&self.client, &self.reconnect, session).await {
                    Some(conn) => conn,
                    None => return,
                }
            }
        };

        loop {
            let end = self.serve(&mut conn, session).await;
            if end == SessionEnd::Cancelled {
                if let Err(e) = conn.ws_stream.close(None).await {
                    tracing::debug!(error = %e, "Push channel close handshake failed");
                }
                tracing::info!(client_id = %conn.client_id, "Push channel closed");
                return;
            }

            tracing::info!(
                client_id = %conn.client_id,
                ?end,
                "Push channel lost, entering reconnect loop",
            );
            conn = match reconnect_loop(&self.client, &self.reconnect, session).await {
                Some(conn) => conn,
                None => return,
            };
        }
    }

    async fn serve(&self, conn: &mut PushConnection, session: &CancellationToken) -> SessionEnd {
        self.connected.send_replace(true);
        tracing::info!(
            client_id = %conn.client_id,
            tracked = self.store.tracked_count(),
            "Push channel open",
        );
        let end = process_messages(&mut conn.ws_stream, &self.store, session).await;
        self.connected.send_replace(false);
        end
    }
}

/// Cancel `session` as soon as no job is tracked any more.
async fn cancel_when_idle(mut tracked: watch::Receiver<usize>, session: CancellationToken) {
    loop {
        if *tracked.borrow_and_update() == 0 {
            tracing::debug!("No tracked jobs left, closing push session");
            session.cancel();
            return;
        }
        tokio::select! {
            _ = session.cancelled() => return,
            changed = tracked.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}
