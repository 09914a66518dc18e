//! Generation job records and the monotone-merge rule.
//!
//! Every update to a job, whatever transport delivered it, is decided by
//! [`merge`]. Statuses are totally ordered
//! (`queued < processing < {completed, failed}`) and progress never
//! decreases within a status, so stale, duplicated or reordered updates
//! cannot move a record backwards.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    /// Local tombstone. Only reachable through deletion, never through a merge.
    Deleted,
}

impl JobStatus {
    /// Position on the status order. `Completed` and `Failed` share a rank.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
            JobStatus::Deleted => 3,
        }
    }

    /// Jobs in these states still expect updates from the service.
    pub fn is_tracked(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Processing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "deleted" => Ok(JobStatus::Deleted),
            other => Err(CoreError::Validation(format!("Unknown job status '{other}'"))),
        }
    }
}

/// Which producer delivered an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateSource {
    Creation,
    Push,
    Poll,
}

impl UpdateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateSource::Creation => "creation",
            UpdateSource::Push => "push",
            UpdateSource::Poll => "poll",
        }
    }
}

impl std::fmt::Display for UpdateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// GenerationJob
// ---------------------------------------------------------------------------

/// Current state of one submitted generation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationJob {
    pub id: JobId,
    pub status: JobStatus,
    /// Percentage in `0..=100`.
    pub progress: u8,
    pub message: String,
    pub created_at: Timestamp,
    /// Only present once completed.
    pub duration_seconds: Option<f64>,
    /// Only present once completed.
    pub music_data: Option<serde_json::Value>,
    /// Only present once completed.
    pub midi_url: Option<String>,
    /// Bumped on every accepted update.
    pub version: u64,
    /// Producer of the last accepted update.
    pub last_source: UpdateSource,
}

impl GenerationJob {
    /// Same record with everything but `version` and `last_source` equal.
    fn same_observable_state(&self, other: &GenerationJob) -> bool {
        self.status == other.status
            && self.progress == other.progress
            && self.message == other.message
            && self.created_at == other.created_at
            && self.duration_seconds == other.duration_seconds
            && self.music_data == other.music_data
            && self.midi_url == other.midi_url
    }
}

// ---------------------------------------------------------------------------
// JobPatch
// ---------------------------------------------------------------------------

/// A partial update for a job, as reported by one producer.
///
/// Built with [`JobPatch::new`] and the `with_*` methods. Absent fields
/// leave the current value untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct JobPatch {
    pub status: JobStatus,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub created_at: Option<Timestamp>,
    pub duration_seconds: Option<f64>,
    pub music_data: Option<serde_json::Value>,
    pub midi_url: Option<String>,
}

impl JobPatch {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            progress: None,
            message: None,
            created_at: None,
            duration_seconds: None,
            music_data: None,
            midi_url: None,
        }
    }

    /// Values above 100 are clamped.
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    pub fn with_music_data(mut self, music_data: serde_json::Value) -> Self {
        self.music_data = Some(music_data);
        self
    }

    pub fn with_midi_url(mut self, midi_url: impl Into<String>) -> Self {
        self.midi_url = Some(midi_url.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Why an accepted update was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// First sighting of the identifier.
    Seeded,
    /// Status moved forward on the status order.
    Advanced,
    /// Same status, same or higher progress, something changed.
    Refreshed,
}

/// Why an update was declined. Declines are normal and never surfaced
/// to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// The identifier was deleted locally.
    Tombstoned,
    /// Deletion only happens through a tombstone, never through an update.
    DeletedViaUpdate,
    /// Incoming status is behind the current one.
    StatusRegression,
    /// `completed` and `failed` never replace each other.
    ConflictingTerminal,
    /// Same status, lower progress.
    ProgressRegression,
    /// Nothing observable would change.
    Duplicate,
}

/// Decide whether `patch` may be applied on top of `current` and compute
/// the resulting record.
///
/// Rules, in order:
/// - tombstoned records reject everything;
/// - an unknown identifier is seeded from the patch;
/// - a strictly higher status rank is always accepted;
/// - an equal status is accepted when progress does not decrease. On a
///   progress tie, a poll update arriving after a push update may only
///   fill fields that are still empty.
///
/// An accepted update that leaves the observable state unchanged is
/// reported as [`StaleReason::Duplicate`] so that replays are no-ops.
pub fn merge(
    id: &str,
    current: Option<&GenerationJob>,
    patch: &JobPatch,
    source: UpdateSource,
) -> Result<(MergeKind, GenerationJob), StaleReason> {
    if patch.status == JobStatus::Deleted {
        return Err(StaleReason::DeletedViaUpdate);
    }

    let Some(current) = current else {
        return Ok((MergeKind::Seeded, seed(id, patch, source)));
    };

    if current.status == JobStatus::Deleted {
        return Err(StaleReason::Tombstoned);
    }

    let current_rank = current.status.rank();
    let incoming_rank = patch.status.rank();

    if incoming_rank < current_rank {
        return Err(StaleReason::StatusRegression);
    }
    if incoming_rank > current_rank {
        return Ok((MergeKind::Advanced, advance(current, patch, source)));
    }
    if patch.status != current.status {
        return Err(StaleReason::ConflictingTerminal);
    }

    let incoming_progress = if current.status.is_tracked() {
        patch.progress.unwrap_or(current.progress)
    } else {
        current.progress
    };
    if incoming_progress < current.progress {
        return Err(StaleReason::ProgressRegression);
    }

    let fill_only = incoming_progress == current.progress
        && source == UpdateSource::Poll
        && current.last_source == UpdateSource::Push;

    let next = refresh(current, patch, source, incoming_progress, fill_only);
    if next.same_observable_state(current) {
        return Err(StaleReason::Duplicate);
    }
    Ok((MergeKind::Refreshed, next))
}

fn seed(id: &str, patch: &JobPatch, source: UpdateSource) -> GenerationJob {
    let completed = patch.status == JobStatus::Completed;
    GenerationJob {
        id: id.to_string(),
        status: patch.status,
        progress: if completed {
            100
        } else {
            patch.progress.unwrap_or(0)
        },
        message: patch.message.clone().unwrap_or_default(),
        created_at: patch.created_at.unwrap_or_else(chrono::Utc::now),
        duration_seconds: patch.duration_seconds.filter(|_| completed),
        music_data: patch.music_data.clone().filter(|_| completed),
        midi_url: patch.midi_url.clone().filter(|_| completed),
        version: 1,
        last_source: source,
    }
}

fn advance(current: &GenerationJob, patch: &JobPatch, source: UpdateSource) -> GenerationJob {
    let completed = patch.status == JobStatus::Completed;
    let progress = match patch.status {
        JobStatus::Completed => 100,
        JobStatus::Failed => current.progress,
        _ => current.progress.max(patch.progress.unwrap_or(current.progress)),
    };
    GenerationJob {
        id: current.id.clone(),
        status: patch.status,
        progress,
        message: patch
            .message
            .clone()
            .unwrap_or_else(|| current.message.clone()),
        created_at: current.created_at,
        duration_seconds: patch.duration_seconds.filter(|_| completed),
        music_data: patch.music_data.clone().filter(|_| completed),
        midi_url: patch.midi_url.clone().filter(|_| completed),
        version: current.version + 1,
        last_source: source,
    }
}

fn refresh(
    current: &GenerationJob,
    patch: &JobPatch,
    source: UpdateSource,
    progress: u8,
    fill_only: bool,
) -> GenerationJob {
    let completed = current.status == JobStatus::Completed;
    let message = match &patch.message {
        Some(m) if !fill_only || current.message.is_empty() => m.clone(),
        _ => current.message.clone(),
    };
    GenerationJob {
        id: current.id.clone(),
        status: current.status,
        progress,
        message,
        created_at: current.created_at,
        duration_seconds: pick(fill_only, current.duration_seconds, patch.duration_seconds)
            .filter(|_| completed),
        music_data: pick(fill_only, current.music_data.clone(), patch.music_data.clone())
            .filter(|_| completed),
        midi_url: pick(fill_only, current.midi_url.clone(), patch.midi_url.clone())
            .filter(|_| completed),
        version: current.version + 1,
        last_source: if fill_only { current.last_source } else { source },
    }
}

/// Incoming value wins unless only empty fields may be filled.
fn pick<T>(fill_only: bool, current: Option<T>, incoming: Option<T>) -> Option<T> {
    if fill_only {
        current.or(incoming)
    } else {
        incoming.or(current)
    }
}

/// Build the tombstone that replaces a record on deletion.
pub fn tombstone_of(id: &str, current: Option<&GenerationJob>) -> GenerationJob {
    match current {
        Some(job) => GenerationJob {
            status: JobStatus::Deleted,
            duration_seconds: None,
            music_data: None,
            midi_url: None,
            version: job.version + 1,
            ..job.clone()
        },
        None => GenerationJob {
            id: id.to_string(),
            status: JobStatus::Deleted,
            progress: 0,
            message: String::new(),
            created_at: chrono::Utc::now(),
            duration_seconds: None,
            music_data: None,
            midi_url: None,
            version: 1,
            last_source: UpdateSource::Creation,
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
