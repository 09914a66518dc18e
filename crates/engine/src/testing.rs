//! In-memory [`GenerationService`] double for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use cadenza_core::request::GenerationRequest;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::api::{
    ApiError, GenerationService, GenreInfo, HealthResponse, RemoteJob, SubmitResponse,
};

#[derive(Default)]
pub(crate) struct MockService {
    calls: Mutex<Vec<String>>,
    listing: Mutex<Vec<RemoteJob>>,
    statuses: Mutex<HashMap<String, RemoteJob>>,
    submitted: Mutex<Vec<GenerationRequest>>,
    artifact: Mutex<Vec<u8>>,
    next_id: AtomicU32,
    fail_submit: AtomicBool,
    fail_list: AtomicBool,
    fail_delete: AtomicBool,
    fail_download: AtomicBool,
}

impl MockService {
    pub fn set_listing(&self, listing: Vec<RemoteJob>) {
        *self.listing.lock().unwrap() = listing;
    }

    pub fn set_status(&self, remote: RemoteJob) {
        self.statuses
            .lock()
            .unwrap()
            .insert(remote.id.clone(), remote);
    }

    pub fn set_artifact(&self, bytes: &[u8]) {
        *self.artifact.lock().unwrap() = bytes.to_vec();
    }

    pub fn fail_submit(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn fail_download(&self, fail: bool) {
        self.fail_download.store(fail, Ordering::SeqCst);
    }

    pub fn count_calls(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.as_str() == name)
            .count()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn submitted(&self) -> Vec<GenerationRequest> {
        self.submitted.lock().unwrap().clone()
    }

    fn record(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }

    fn unavailable() -> ApiError {
        ApiError::ApiError {
            status: 503,
            body: "service unavailable".to_string(),
        }
    }
}

#[async_trait]
impl GenerationService for MockService {
    async fn submit(&self, request: &GenerationRequest) -> Result<SubmitResponse, ApiError> {
        self.record("submit");
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.submitted.lock().unwrap().push(request.clone());
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(SubmitResponse {
            id: if n == 0 { "abc".to_string() } else { format!("abc{n}") },
            status: Some("queued".to_string()),
            created_at: Some("2024-05-01T10:00:00.000000".to_string()),
        })
    }

    async fn list(&self) -> Result<Vec<RemoteJob>, ApiError> {
        self.record("list");
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(self.listing.lock().unwrap().clone())
    }

    async fn status(&self, id: &str) -> Result<Option<RemoteJob>, ApiError> {
        self.record("status");
        Ok(self.statuses.lock().unwrap().get(id).cloned())
    }

    async fn delete(&self, _id: &str) -> Result<(), ApiError> {
        self.record("delete");
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(())
    }

    async fn download(
        &self,
        _id: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ApiError> {
        self.record("download");
        if self.fail_download.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let bytes = self.artifact.lock().unwrap().clone();
        sink.write_all(&bytes).await?;
        sink.flush().await?;
        Ok(bytes.len() as u64)
    }

    async fn health(&self) -> Result<HealthResponse, ApiError> {
        self.record("health");
        Ok(HealthResponse {
            status: "healthy".to_string(),
            timestamp: None,
            generator_loaded: true,
        })
    }

    async fn genres(&self) -> Result<Vec<GenreInfo>, ApiError> {
        self.record("genres");
        Ok(vec![GenreInfo {
            name: "jazz".to_string(),
            description: "Jazz and swing music".to_string(),
        }])
    }
}
