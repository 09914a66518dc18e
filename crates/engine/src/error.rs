use cadenza_core::error::CoreError;

use crate::api::ApiError;

/// Errors surfaced to consumers of the engine.
///
/// Validation and precondition failures arrive as [`CoreError`] and are
/// raised before any network call; [`EngineError::Transport`] wraps
/// failures talking to the generation service.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A domain-level error from `cadenza_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Network failure, timeout or non-2xx response.
    #[error("Transport error: {0}")]
    Transport(#[from] ApiError),

    /// Local file system failure while exporting.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Core(CoreError::Validation(_)))
    }

    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, EngineError::Core(CoreError::PreconditionFailed(_)))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
