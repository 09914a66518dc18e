//! Push channel message types and parser.
//!
//! The generation service sends JSON frames of the shape
//! `{"type": "status_update", "generation_id": ..., "status": ...,
//! "progress": ..., "message": ...}`. Frames without a `type` field are
//! read as status updates too.

use cadenza_core::error::CoreError;
use cadenza_core::job::{JobPatch, JobStatus};
use serde::Deserialize;

/// All known push channel message types.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum PushMessage {
    /// Progress report for one job.
    #[serde(rename = "status_update")]
    StatusUpdate(StatusUpdate),
}

/// Payload for `status_update` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdate {
    pub generation_id: String,
    pub status: String,
    /// Percentage; the service may send it as a float. Absent progress
    /// compares as unchanged.
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl StatusUpdate {
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
        Ok(patch)
    }
}

/// Round a service-reported percentage into `0..=100`. Non-finite values map to 0.
pub fn clamp_percent(value: f64) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

/// Parse a push channel text frame into a typed enum.
///
/// Returns `Err` for malformed JSON or unknown `type` values.
/// Callers should log and continue.
pub fn parse_message(text: &str) -> Result<PushMessage, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("type").is_none() {
        return serde_json::from_value(value).map(PushMessage::StatusUpdate);
    }
    serde_json::from_value(value)
}
