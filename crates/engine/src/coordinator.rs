//! Job creation.
//!
//! [`CreationCoordinator::submit`] validates a request, issues a single
//! `POST /generate`, and seeds the store with a queued record once the
//! service has assigned an id. Failures never touch the store.

use std::sync::Arc;

use cadenza_core::job::{JobPatch, JobStatus, UpdateSource};
use cadenza_core::request::GenerationRequest;
use cadenza_core::types::JobId;

use crate::api::{parse_timestamp, GenerationService};
use crate::error::EngineResult;
use crate::store::JobStore;

/// Initial message for a freshly queued job.
const QUEUED_MESSAGE: &str = "Generation queued";

pub struct CreationCoordinator {
    service: Arc<dyn GenerationService>,
    store: Arc<JobStore>,
}

impl CreationCoordinator {
    pub fn new(service: Arc<dyn GenerationService>, store: Arc<JobStore>) -> Self {
        Self { service, store }
    }

    /// Submit a new job and return its service-assigned id.
    ///
    /// Concurrent calls create independent jobs.
    pub async fn submit(&self, request: &GenerationRequest) -> EngineResult<JobId> {
        request.validate()?;

        let response = self.service.submit(request).await.map_err(|e| {
            tracing::warn!(error = %e, "Generation submission failed");
            e
        })?;

        let mut patch = JobPatch::new(JobStatus::Queued)
            .with_progress(0)
            .with_message(QUEUED_MESSAGE);
        if let Some(created_at) = response.created_at.as_deref().and_then(parse_timestamp) {
            patch = patch.with_created_at(created_at);
        }

        let outcome = self
            .store
            .upsert_if_newer(&response.id, &patch, UpdateSource::Creation)
            .await;

        tracing::info!(
            job_id = %response.id,
            genre = request.genre.as_str(),
            tempo = request.tempo_bpm,
            length = request.length_notes,
            ?outcome,
            "Generation submitted",
        );

        Ok(response.id)
    }
}
