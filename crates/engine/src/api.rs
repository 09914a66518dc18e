//! REST API client for the generation service.
//!
//! [`GenerationService`] is the seam the engine talks through;
//! [`GenerationApi`] implements it over HTTP with [`reqwest`].

use std::time::Duration;

use async_trait::async_trait;
use cadenza_core::error::CoreError;
use cadenza_core::job::{JobPatch, JobStatus};
use cadenza_core::request::GenerationRequest;
use cadenza_core::types::Timestamp;
use serde::Deserialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::messages::clamp_percent;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Response returned by `POST /generate` after the job was queued.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the job.
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// One entry of `GET /generations`, also the body of `GET /status/{id}`.
///
/// The listing only carries `progress` and `message` for some jobs, and
/// only carries the artifact fields once a job has completed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteJob {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub music_data: Option<serde_json::Value>,
    #[serde(default)]
    pub midi_url: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
}

impl RemoteJob {
    /// Convert into a store patch. Fails on an unknown status string.
    pub fn to_patch(&self) -> Result<JobPatch, CoreError> {
        let status: JobStatus = self.status.parse()?;
        let mut patch = JobPatch::new(status);
        if let Some(progress) = self.progress {
            patch = patch.with_progress(clamp_percent(progress));
        }
        if let Some(message) = &self.message {
            patch = patch.with_message(message.clone());
        }
        if let Some(created_at) = self.created_at.as_deref().and_then(parse_timestamp) {
            patch = patch.with_created_at(created_at);
        }
        if let Some(duration) = self.duration {
            patch = patch.with_duration(duration);
        }
        if let Some(music_data) = &self.music_data {
            patch = patch.with_music_data(music_data.clone());
        }
        if let Some(midi_url) = &self.midi_url {
            patch = patch.with_midi_url(midi_url.clone());
        }
        Ok(patch)
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    generations: Vec<RemoteJob>,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub generator_loaded: bool,
}

/// One entry of `GET /genres`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenreInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct GenresResponse {
    #[serde(default)]
    genres: Vec<GenreInfo>,
}

/// Parse a service timestamp.
///
/// Accepts RFC 3339 and the naive ISO-8601 form (no offset) the service
/// emits, which is taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&chrono::Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, body decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Generation service error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A 2xx response whose content cannot be used.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Writing a downloaded artifact to its sink failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// GenerationService
// ---------------------------------------------------------------------------

/// Remote operations the engine depends on.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// `POST /generate`.
    async fn submit(&self, request: &GenerationRequest) -> Result<SubmitResponse, ApiError>;

    /// `GET /generations`, the full snapshot used by the poll reconciler.
    async fn list(&self) -> Result<Vec<RemoteJob>, ApiError>;

    /// `GET /status/{id}`. `Ok(None)` when the service does not know the id.
    async fn status(&self, id: &str) -> Result<Option<RemoteJob>, ApiError>;

    /// `DELETE /generation/{id}`. Idempotent on the service side.
    async fn delete(&self, id: &str) -> Result<(), ApiError>;

    /// `GET /download/{id}`, streamed chunk by chunk into `sink`.
    /// Returns the number of bytes written.
    async fn download(
        &self,
        id: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ApiError>;

    /// `GET /health`.
    async fn health(&self) -> Result<HealthResponse, ApiError>;

    /// `GET /genres`.
    async fn genres(&self) -> Result<Vec<GenreInfo>, ApiError>;
}

// ---------------------------------------------------------------------------
// GenerationApi
// ---------------------------------------------------------------------------

/// HTTP client for a single generation service.
pub struct GenerationApi {
    client: reqwest::Client,
    api_url: String,
}

impl GenerationApi {
    /// Create a new API client.
    ///
    /// * `api_url`         - Base HTTP URL, e.g. `http://host:8000`.
    /// * `request_timeout` - Upper bound for every request, including
    ///   artifact downloads.
    pub fn new(api_url: String, request_timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self::with_client(client, api_url))
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`ApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl GenerationService for GenerationApi {
    async fn submit(&self, request: &GenerationRequest) -> Result<SubmitResponse, ApiError> {
        let response = self
            .client
            .post(self.url("/generate"))
            .json(request)
            .send()
            .await?;

        let submitted: SubmitResponse = Self::parse_response(response).await?;
        if submitted.id.is_empty() {
            return Err(ApiError::InvalidResponse(
                "generation service returned an empty id".to_string(),
            ));
        }
        Ok(submitted)
    }

    async fn list(&self) -> Result<Vec<RemoteJob>, ApiError> {
        let response = self.client.get(self.url("/generations")).send().await?;
        let listing: ListResponse = Self::parse_response(response).await?;
        Ok(listing.generations)
    }

    async fn status(&self, id: &str) -> Result<Option<RemoteJob>, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/status/{id}")))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::parse_response(response).await.map(Some)
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(self.url(&format!("/generation/{id}")))
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn download(
        &self,
        id: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/download/{id}")))
            .send()
            .await?;
        let mut response = Self::ensure_success(response).await?;

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        sink.flush().await?;
        Ok(written)
    }

    async fn health(&self) -> Result<HealthResponse, ApiError> {
        let response = self.client.get(self.url("/health")).send().await?;
        Self::parse_response(response).await
    }

    async fn genres(&self) -> Result<Vec<GenreInfo>, ApiError> {
        let response = self.client.get(self.url("/genres")).send().await?;
        let body: GenresResponse = Self::parse_response(response).await?;
        Ok(body.genres)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn listing_entry_without_progress_converts() {
        let json = r#"{"generations":[{"id":"gen_1","status":"queued","created_at":"2024-05-01T10:00:00.123456"}]}"#;
        let listing: ListResponse = serde_json::from_str(json).unwrap();
        let patch = listing.generations[0].to_patch().unwrap();
        assert_eq!(patch.status, JobStatus::Queued);
        assert!(patch.progress.is_none());
        assert!(patch.created_at.is_some());
    }

    #[test]
    fn completed_entry_carries_artifacts() {
        let json = r#"{"id":"gen_2","status":"completed","music_data":[{"type":"note_on","note":60}],"midi_url":"/download/gen_2","created_at":"2024-05-01T10:00:00","duration":50.0}"#;
        let remote: RemoteJob = serde_json::from_str(json).unwrap();
        let patch = remote.to_patch().unwrap();
        assert_eq!(patch.status, JobStatus::Completed);
        assert_eq!(patch.duration_seconds, Some(50.0));
        assert_eq!(patch.midi_url.as_deref(), Some("/download/gen_2"));
        assert!(patch.music_data.unwrap().is_array());
    }

    #[test]
    fn unknown_status_is_rejected() {
        let remote = RemoteJob {
            id: "gen_3".into(),
            status: "paused".into(),
            ..Default::default()
        };
        assert_matches!(remote.to_patch(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn parse_timestamp_accepts_both_forms() {
        assert!(parse_timestamp("2024-05-01T10:00:00Z").is_some());
        assert!(parse_timestamp("2024-05-01T10:00:00+02:00").is_some());
        assert!(parse_timestamp("2024-05-01T10:00:00.5").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn api_url_trailing_slash_is_trimmed() {
        let api = GenerationApi::with_client(reqwest::Client::new(), "http://host:8000/".into());
        assert_eq!(api.api_url(), "http://host:8000");
        assert_eq!(api.url("/generations"), "http://host:8000/generations");
    }
}
