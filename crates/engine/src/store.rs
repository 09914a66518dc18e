//! In-memory job record store.
//!
//! [`JobStore`] is the only shared mutable state of the engine. Creation,
//! the push channel and the poll reconciler all write through
//! [`JobStore::upsert_if_newer`] (or its tracked-only variant), which runs
//! [`merge`] under a single write lock, so the merge rule is the one place
//! where update ordering is decided.
//!
//! Every accepted mutation is published as a [`JobChanged`] on the
//! [`EventBus`], and the number of tracked jobs (queued or processing) is
//! published on a watch channel for the push channel to open and close on.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use cadenza_core::job::{
    merge, tombstone_of, GenerationJob, JobPatch, MergeKind, StaleReason, UpdateSource,
};
use cadenza_core::types::JobId;
use cadenza_events::{EventBus, JobChanged};
use tokio::sync::{broadcast, watch, RwLock};
use tokio::time::Instant;

/// Result of an upsert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Accepted(MergeKind),
    Rejected(StaleReason),
    /// Dropped by [`JobStore::upsert_if_tracked`]: the id is unknown or no
    /// longer expects updates.
    Untracked,
}

impl UpsertOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, UpsertOutcome::Accepted(_))
    }
}

struct Entry {
    job: GenerationJob,
    /// Store revision at which the record was first seeded.
    seeded_at: u64,
    /// Set once tombstoned.
    deleted_at: Option<Instant>,
}

#[derive(Default)]
struct StoreInner {
    jobs: HashMap<JobId, Entry>,
    /// Bumped on every accepted mutation.
    revision: u64,
}

impl StoreInner {
    fn tracked_count(&self) -> usize {
        self.jobs
            .values()
            .filter(|entry| entry.job.status.is_tracked())
            .count()
    }
}

pub struct JobStore {
    inner: RwLock<StoreInner>,
    events: Arc<EventBus>,
    tracked_tx: watch::Sender<usize>,
}

impl JobStore {
    pub fn new(events: Arc<EventBus>) -> Self {
        let (tracked_tx, _) = watch::channel(0);
        Self {
            inner: RwLock::new(StoreInner::default()),
            events,
            tracked_tx,
        }
    }

    // ---- reads ----

    /// Current record, `None` when unknown or deleted.
    pub async fn get(&self, id: &str) -> Option<GenerationJob> {
        self.inner
            .read()
            .await
            .jobs
            .get(id)
            .filter(|entry| entry.deleted_at.is_none())
            .map(|entry| entry.job.clone())
    }

    pub async fn is_tombstoned(&self, id: &str) -> bool {
        self.inner
            .read()
            .await
            .jobs
            .get(id)
            .is_some_and(|entry| entry.deleted_at.is_some())
    }

    /// All live records, oldest first.
    pub async fn list(&self) -> Vec<GenerationJob> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<GenerationJob> = inner
            .jobs
            .values()
            .filter(|entry| entry.deleted_at.is_none())
            .map(|entry| entry.job.clone())
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    pub async fn revision(&self) -> u64 {
        self.inner.read().await.revision
    }

    /// Number of jobs currently queued or processing.
    pub fn tracked_count(&self) -> usize {
        *self.tracked_tx.borrow()
    }

    pub fn watch_tracked(&self) -> watch::Receiver<usize> {
        self.tracked_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobChanged> {
        self.events.subscribe()
    }

    // ---- writes ----

    /// Apply `patch` if the merge rule accepts it.
    pub async fn upsert_if_newer(
        &self,
        id: &str,
        patch: &JobPatch,
        source: UpdateSource,
    ) -> UpsertOutcome {
        let mut inner = self.inner.write().await;
        self.apply(&mut inner, id, patch, source)
    }

    /// Like [`upsert_if_newer`](Self::upsert_if_newer), but only for ids
    /// that are live and still queued or processing. Anything else is
    /// dropped without reaching the merge rule.
    pub async fn upsert_if_tracked(
        &self,
        id: &str,
        patch: &JobPatch,
        source: UpdateSource,
    ) -> UpsertOutcome {
        let mut inner = self.inner.write().await;
        let tracked = inner
            .jobs
            .get(id)
            .is_some_and(|entry| entry.job.status.is_tracked());
        if !tracked {
            return UpsertOutcome::Untracked;
        }
        self.apply(&mut inner, id, patch, source)
    }

    /// Replace the record with a tombstone so later updates are rejected.
    ///
    /// Unknown ids get a tombstone too. Returns `false` when the id was
    /// already tombstoned.
    pub async fn tombstone(&self, id: &str) -> bool {
        let mut inner = self.inner.write().await;
        self.bury(&mut inner, id)
    }

    /// Tombstone every live record that is absent from `present` and was
    /// seeded at or before `fetched_at` (the revision observed when the
    /// listing request was issued). Returns the ids that were tombstoned.
    pub async fn tombstone_missing(&self, present: &HashSet<JobId>, fetched_at: u64) -> Vec<JobId> {
        let mut inner = self.inner.write().await;
        let missing: Vec<JobId> = inner
            .jobs
            .iter()
            .filter(|(id, entry)| {
                entry.deleted_at.is_none() && entry.seeded_at <= fetched_at && !present.contains(*id)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &missing {
            self.bury(&mut inner, id);
        }
        missing
    }

    /// Forget tombstones older than `retention`. Returns how many were removed.
    pub async fn prune_tombstones(&self, retention: Duration) -> usize {
        let mut inner = self.inner.write().await;
        let before = inner.jobs.len();
        inner.jobs.retain(|_, entry| match entry.deleted_at {
            Some(deleted_at) => deleted_at.elapsed() < retention,
            None => true,
        });
        before - inner.jobs.len()
    }

    // ---- private helpers ----

    fn apply(
        &self,
        inner: &mut StoreInner,
        id: &str,
        patch: &JobPatch,
        source: UpdateSource,
    ) -> UpsertOutcome {
        let current = inner.jobs.get(id).map(|entry| &entry.job);
        let (kind, job) = match merge(id, current, patch, source) {
            Ok(accepted) => accepted,
            Err(reason) => {
                tracing::trace!(job_id = %id, %source, ?reason, "Update declined");
                return UpsertOutcome::Rejected(reason);
            }
        };

        inner.revision += 1;
        let revision = inner.revision;
        match inner.jobs.get_mut(id) {
            Some(entry) => entry.job = job.clone(),
            None => {
                inner.jobs.insert(
                    id.to_string(),
                    Entry {
                        job: job.clone(),
                        seeded_at: revision,
                        deleted_at: None,
                    },
                );
            }
        }

        tracing::debug!(
            job_id = %id,
            %source,
            status = %job.status,
            progress = job.progress,
            version = job.version,
            ?kind,
            "Job updated",
        );

        self.publish_tracked(inner);
        self.events.publish(JobChanged::new(job, Some(source)));
        UpsertOutcome::Accepted(kind)
    }

    fn bury(&self, inner: &mut StoreInner, id: &str) -> bool {
        if inner.jobs.get(id).is_some_and(|entry| entry.deleted_at.is_some()) {
            return false;
        }

        let tombstone = tombstone_of(id, inner.jobs.get(id).map(|entry| &entry.job));
        inner.revision += 1;
        let revision = inner.revision;
        let entry = inner.jobs.entry(id.to_string()).or_insert_with(|| Entry {
            job: tombstone.clone(),
            seeded_at: revision,
            deleted_at: None,
        });
        entry.job = tombstone.clone();
        entry.deleted_at = Some(Instant::now());

        tracing::debug!(job_id = %id, "Job tombstoned");

        self.publish_tracked(inner);
        self.events.publish(JobChanged::new(tombstone, None));
        true
    }

    fn publish_tracked(&self, inner: &StoreInner) {
        let count = inner.tracked_count();
        self.tracked_tx.send_if_modified(|current| {
            if *current == count {
                return false;
            }
            *current = count;
            true
        });
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new(Arc::new(EventBus::default()))
    }
}
