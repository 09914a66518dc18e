use std::path::PathBuf;

use cadenza_core::error::CoreError;
use cadenza_core::request::GenerationRequest;

/// Worker-only settings layered on top of the engine configuration.
#[derive(Debug, Clone, Default)]
pub struct WorkerSettings {
    /// Request to submit once the engine is up, if any.
    pub submit: Option<GenerationRequest>,
    /// Directory completed artifacts are exported into.
    pub export_dir: Option<PathBuf>,
}

impl WorkerSettings {
    /// | Env Var           | Default     |
    /// |-------------------|-------------|
    /// | `SUBMIT_ON_START` | `false`     |
    /// | `SUBMIT_GENRE`    | `classical` |
    /// | `SUBMIT_TEMPO`    | `120`       |
    /// | `SUBMIT_LENGTH`   | `100`       |
    /// | `EXPORT_DIR`      | unset       |
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let submit_on_start = lookup("SUBMIT_ON_START")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let submit = if submit_on_start {
            let mut request = GenerationRequest::default();
            if let Some(genre) = lookup("SUBMIT_GENRE") {
                request.genre = genre.parse()?;
            }
            if let Some(tempo) = lookup("SUBMIT_TEMPO") {
                request.tempo_bpm = parse_number("SUBMIT_TEMPO", &tempo)?;
            }
            if let Some(length) = lookup("SUBMIT_LENGTH") {
                request.length_notes = parse_number("SUBMIT_LENGTH", &length)?;
            }
            Some(request)
        } else {
            None
        };

        Ok(Self {
            submit,
            export_dir: lookup("EXPORT_DIR").map(PathBuf::from),
        })
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u16, CoreError> {
    raw.trim()
        .parse()
        .map_err(|_| CoreError::Validation(format!("{key} must be a whole number, got '{raw}'")))
}
