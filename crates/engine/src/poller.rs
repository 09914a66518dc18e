//! Periodic full-listing reconciliation.
//!
//! [`PollReconciler`] fetches `GET /generations` on a fixed interval,
//! independent of push channel health, and merges every entry into the
//! store with source `poll`. Records the listing no longer mentions are
//! tombstoned locally. This is what brings the store to eventual
//! consistency when push events are lost or the push channel never
//! connected.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use cadenza_core::job::UpdateSource;
use cadenza_core::types::JobId;

use crate::api::{ApiError, GenerationService};
use crate::store::JobStore;

/// Counters for one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Entries in the listing.
    pub fetched: usize,
    /// Entries the store accepted.
    pub accepted: usize,
    /// Local records tombstoned because the listing no longer has them.
    pub tombstoned: usize,
    /// Entries skipped because their status could not be read.
    pub skipped: usize,
}

pub struct PollReconciler {
    service: Arc<dyn GenerationService>,
    store: Arc<JobStore>,
    interval: Duration,
    tombstone_retention: Option<Duration>,
}

impl PollReconciler {
    pub fn new(
        service: Arc<dyn GenerationService>,
        store: Arc<JobStore>,
        interval: Duration,
        tombstone_retention: Option<Duration>,
    ) -> Self {
        Self {
            service,
            store,
            interval,
            tombstone_retention,
        }
    }

    /// Run the reconciliation loop until `cancel` is triggered.
    ///
    /// The first pass runs immediately so pre-existing jobs show up
    /// without waiting a full interval.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs_f64(),
            "Poll reconciler started"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Poll reconciler stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.reconcile_once().await {
                        Ok(summary) => {
                            if summary.accepted > 0 || summary.tombstoned > 0 {
                                tracing::debug!(?summary, "Poll reconciliation applied changes");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Poll reconciliation failed, retrying next tick");
                        }
                    }
                    if let Some(retention) = self.tombstone_retention {
                        let pruned = self.store.prune_tombstones(retention).await;
                        if pruned > 0 {
                            tracing::debug!(pruned, "Pruned expired tombstones");
                        }
                    }
                }
            }
        }
    }

    /// Fetch the listing once and merge it into the store.
    pub async fn reconcile_once(&self) -> Result<ReconcileSummary, ApiError> {
        let fetched_at = self.store.revision().await;
        let listing = self.service.list().await?;

        let mut summary = ReconcileSummary {
            fetched: listing.len(),
            ..Default::default()
        };
        let mut present: HashSet<JobId> = HashSet::with_capacity(listing.len());

        for remote in &listing {
            present.insert(remote.id.clone());
            let patch = match remote.to_patch() {
                Ok(patch) => patch,
                Err(e) => {
                    tracing::warn!(job_id = %remote.id, error = %e, "Skipping listing entry");
                    summary.skipped += 1;
                    continue;
                }
            };
            if self
                .store
                .upsert_if_newer(&remote.id, &patch, UpdateSource::Poll)
                .await
                .is_accepted()
            {
                summary.accepted += 1;
            }
        }

        let missing = self.store.tombstone_missing(&present, fetched_at).await;
        for id in &missing {
            tracing::info!(job_id = %id, "Job no longer listed by service, tombstoned");
        }
        summary.tombstoned = missing.len();

        Ok(summary)
    }
}
