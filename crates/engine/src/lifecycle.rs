//! Deletion, export and on-demand refresh of a single job.
//!
//! Deletion tombstones the local record only after the service confirmed
//! it, so any push or poll update already in flight for that id is
//! rejected by the store regardless of when it lands. Export is read-only:
//! a failed download never changes job state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cadenza_core::error::CoreError;
use cadenza_core::job::{GenerationJob, JobStatus, UpdateSource};
use tokio::io::AsyncWrite;

use crate::api::{ApiError, GenerationService};
use crate::error::EngineResult;
use crate::store::JobStore;

pub struct Lifecycle {
    service: Arc<dyn GenerationService>,
    store: Arc<JobStore>,
}

impl Lifecycle {
    pub fn new(service: Arc<dyn GenerationService>, store: Arc<JobStore>) -> Self {
        Self { service, store }
    }

    /// Delete the job on the service, then tombstone it locally.
    ///
    /// On a transport error nothing is changed locally.
    pub async fn delete(&self, id: &str) -> EngineResult<()> {
        self.service.delete(id).await.map_err(|e| {
            tracing::warn!(job_id = %id, error = %e, "Generation delete failed");
            e
        })?;

        self.store.tombstone(id).await;
        tracing::info!(job_id = %id, "Generation deleted");
        Ok(())
    }

    /// Stream the artifact of a completed job into `sink`.
    ///
    /// Fails with a precondition error, without any network call, unless
    /// the job exists and is completed. Returns the number of bytes written.
    pub async fn export(
        &self,
        id: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> EngineResult<u64> {
        self.require_completed(id).await?;
        let written = self.service.download(id, sink).await.map_err(|e| {
            tracing::warn!(job_id = %id, error = %e, "Artifact download failed");
            e
        })?;
        tracing::info!(job_id = %id, bytes = written, "Artifact exported");
        Ok(written)
    }

    /// Export into `dir/ai_music_{id}.json`, removing the partial file if
    /// the download fails.
    pub async fn export_to_dir(&self, id: &str, dir: &Path) -> EngineResult<PathBuf> {
        self.require_completed(id).await?;

        let path = dir.join(artifact_file_name(id));
        let mut file = tokio::fs::File::create(&path).await?;
        let result = self.export(id, &mut file).await;
        match result {
            Ok(_) => Ok(path),
            Err(e) => {
                drop(file);
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    tracing::debug!(path = %path.display(), error = %remove_err, "Could not remove partial export");
                }
                Err(e)
            }
        }
    }

    /// Fetch `GET /status/{id}` and merge it like a poll result.
    ///
    /// A job the service no longer knows is tombstoned, as the poll
    /// reconciler would. Returns the record after the merge.
    pub async fn refresh(&self, id: &str) -> EngineResult<Option<GenerationJob>> {
        match self.service.status(id).await? {
            Some(remote) => {
                let patch = remote
                    .to_patch()
                    .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
                self.store
                    .upsert_if_newer(id, &patch, UpdateSource::Poll)
                    .await;
            }
            None => {
                if self.store.get(id).await.is_some() {
                    tracing::info!(job_id = %id, "Job unknown to service, tombstoned");
                    self.store.tombstone(id).await;
                }
            }
        }
        Ok(self.store.get(id).await)
    }

    async fn require_completed(&self, id: &str) -> EngineResult<GenerationJob> {
        let job = self.store.get(id).await.ok_or_else(|| {
            CoreError::PreconditionFailed(format!("job {id} does not exist"))
        })?;
        if job.status != JobStatus::Completed {
            return Err(CoreError::PreconditionFailed(format!(
                "job {id} is {}, export requires completed",
                job.status
            ))
            .into());
        }
        Ok(job)
    }
}

/// File name used for exported artifacts. Characters outside
/// `[A-Za-z0-9_-]` are replaced so the id cannot escape the directory.
pub fn artifact_file_name(id: &str) -> String {
    let safe: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("ai_music_{safe}.json")
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use cadenza_core::job::JobPatch;

    use super::*;
    use crate::api::RemoteJob;
    use crate::error::EngineError;
    use crate::processor::handle_text_message;
    use crate::testing::MockService;

    async fn setup(status: JobStatus) -> (Arc<MockService>, Arc<JobStore>, Lifecycle) {
        let service = Arc::new(MockService::default());
        let store = Arc::new(JobStore::default());
        store
            .upsert_if_newer("abc", &JobPatch::new(JobStatus::Queued), UpdateSource::Creation)
            .await;
        if status != JobStatus::Queued {
            store
                .upsert_if_newer("abc", &JobPatch::new(status), UpdateSource::Push)
                .await;
        }
        let lifecycle = Lifecycle::new(
            Arc::clone(&service) as Arc<dyn GenerationService>,
            Arc::clone(&store),
        );
        (service, store, lifecycle)
    }

    #[tokio::test]
    async fn delete_fences_late_push_updates() {
        let (_, store, lifecycle) = setup(JobStatus::Queued).await;

        lifecycle.delete("abc").await.unwrap();
        let frame = r#"{"type":"status_update","generation_id":"abc","status":"processing","progress":50,"message":""}"#;
        handle_text_message(frame, &store).await;

        assert!(store.get("abc").await.is_none());
        assert!(store.is_tombstoned("abc").await);
    }

    #[tokio::test]
    async fn failed_delete_keeps_record() {
        let (service, store, lifecycle) = setup(JobStatus::Processing).await;
        service.fail_delete(true);

        let err = lifecycle.delete("abc").await.unwrap_err();

        assert_matches!(err, EngineError::Transport(_));
        assert_eq!(store.get("abc").await.unwrap().status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn export_requires_completed_without_network() {
        let (service, _, lifecycle) = setup(JobStatus::Queued).await;
        let mut sink: Vec<u8> = Vec::new();

        let err = lifecycle.export("abc", &mut sink).await.unwrap_err();

        assert!(err.is_precondition_failed());
        assert_eq!(service.count_calls("download"), 0);

        let err = lifecycle.export("xyz", &mut sink).await.unwrap_err();
        assert!(err.is_precondition_failed());
    }

    #[tokio::test]
    async fn export_streams_artifact() {
        let (service, _, lifecycle) = setup(JobStatus::Completed).await;
        service.set_artifact(br#"[{"type":"note_on","note":60}]"#);
        let mut sink: Vec<u8> = Vec::new();

        let written = lifecycle.export("abc", &mut sink).await.unwrap();

        assert_eq!(written, sink.len() as u64);
        assert!(sink.starts_with(b"[{"));
    }

    #[tokio::test]
    async fn failed_download_leaves_job_completed() {
        let (service, store, lifecycle) = setup(JobStatus::Completed).await;
        service.fail_download(true);
        let mut sink: Vec<u8> = Vec::new();

        assert_matches!(
            lifecycle.export("abc", &mut sink).await,
            Err(EngineError::Transport(_))
        );
        assert_eq!(store.get("abc").await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn export_to_dir_writes_named_file() {
        let (service, _, lifecycle) = setup(JobStatus::Completed).await;
        service.set_artifact(b"[]");
        let dir = tempfile::tempdir().unwrap();

        let path = lifecycle.export_to_dir("abc", dir.path()).await.unwrap();

        assert_eq!(path, dir.path().join("ai_music_abc.json"));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"[]");
    }

    #[tokio::test]
    async fn export_to_dir_removes_partial_file() {
        let (service, _, lifecycle) = setup(JobStatus::Completed).await;
        service.fail_download(true);
        let dir = tempfile::tempdir().unwrap();

        assert!(lifecycle.export_to_dir("abc", dir.path()).await.is_err());
        assert!(!dir.path().join("ai_music_abc.json").exists());
    }

    #[tokio::test]
    async fn refresh_merges_status_as_poll() {
        let (service, _, lifecycle) = setup(JobStatus::Queued).await;
        service.set_status(RemoteJob {
            id: "abc".into(),
            status: "processing".into(),
            progress: Some(60.0),
            message: Some("Applying style constraints...".into()),
            ..Default::default()
        });

        let job = lifecycle.refresh("abc").await.unwrap().unwrap();

        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 60);
        assert_eq!(job.last_source, UpdateSource::Poll);
    }

    #[tokio::test]
    async fn refresh_of_unknown_job_tombstones_it() {
        let (_, store, lifecycle) = setup(JobStatus::Processing).await;

        assert!(lifecycle.refresh("abc").await.unwrap().is_none());
        assert!(store.is_tombstoned("abc").await);
    }

    #[test]
    fn artifact_file_name_is_sanitized() {
        assert_eq!(artifact_file_name("gen_17"), "ai_music_gen_17.json");
        assert_eq!(artifact_file_name("../etc"), "ai_music____etc.json");
    }
}
