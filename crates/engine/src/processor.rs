//! Push channel message processing loop.
//!
//! Reads raw frames from the push connection, parses them into typed
//! [`PushMessage`] variants and routes status updates into the
//! [`JobStore`] with source `push`. Only ids that are currently tracked
//! reach the merge rule; everything else is dropped.

use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use cadenza_core::job::UpdateSource;

use crate::client::PushStream;
use crate::messages::{parse_message, PushMessage, StatusUpdate};
use crate::store::{JobStore, UpsertOutcome};

/// Why a processing session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The service closed the connection or the stream ended.
    Closed,
    /// A receive error broke the connection.
    Failed,
    /// The session token was cancelled (idle or shutdown).
    Cancelled,
}

/// Process frames until the socket closes, errors, or `cancel` fires.
///
/// Binary frames are ignored.
pub async fn process_messages(
    ws_stream: &mut PushStream,
    store: &JobStore,
    cancel: &CancellationToken,
) -> SessionEnd {
    loop {
        let msg_result = tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            next = ws_stream.next() => match next {
                Some(result) => result,
                None => return SessionEnd::Closed,
            },
        };

        match msg_result {
            Ok(Message::Text(text)) => {
                handle_text_message(&text, store).await;
            }
            Ok(Message::Binary(_)) => {
                tracing::trace!("Ignoring binary push frame");
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Handled automatically by tungstenite.
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "Push channel closed by service");
                return SessionEnd::Closed;
            }
            Ok(Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Push channel receive error");
                return SessionEnd::Failed;
            }
        }
    }
}

/// Dispatch a single text frame. Returns the store outcome when the
/// frame was a usable status update.
pub async fn handle_text_message(text: &str, store: &JobStore) -> Option<UpsertOutcome> {
    match parse_message(text) {
        Ok(PushMessage::StatusUpdate(update)) => handle_status_update(&update, store).await,
        Err(e) => {
            tracing::warn!(
                error = %e,
                raw_message = %text,
                "Failed to parse push message",
            );
            None
        }
    }
}

async fn handle_status_update(update: &StatusUpdate, store: &JobStore) -> Option<UpsertOutcome> {
    let patch = match update.to_patch() {
        Ok(patch) => patch,
        Err(e) => {
            tracing::warn!(
                job_id = %update.generation_id,
                error = %e,
                "Dropping push update with unusable status",
            );
            return None;
        }
    };

    let outcome = store
        .upsert_if_tracked(&update.generation_id, &patch, UpdateSource::Push)
        .await;

    if outcome == UpsertOutcome::Untracked {
        tracing::trace!(job_id = %update.generation_id, "Dropping push update for untracked job");
    }
    Some(outcome)
}
