use std::collections::HashSet;

use cadenza_core::job::JobStatus;
use cadenza_core::types::JobId;
use cadenza_events::JobChanged;

/// Remembers which completed jobs were already handed to an export.
///
/// A completed job usually produces several changes (the push completion,
/// then the poll filling in the artifact fields); only the first one
/// triggers a download.
#[derive(Debug, Default)]
pub struct ExportTracker {
    claimed: HashSet<JobId>,
}

impl ExportTracker {
    /// `true` exactly once per completed job.
    pub fn claim(&mut self, change: &JobChanged) -> bool {
        match change.job.status {
            JobStatus::Completed => self.claimed.insert(change.id.clone()),
            JobStatus::Deleted => {
                self.claimed.remove(&change.id);
                false
            }
            _ => false,
        }
    }
}
