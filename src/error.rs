use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Retryable failure: network/timeout-class errors from a connector.
    #[error("transient stage error: {0}")]
    Transient(String),

    /// Non-retryable configuration or programmer error.
    #[error("fatal stage error: {0}")]
    Fatal(String),

    /// The quality gate did not pass. Non-retryable; the failure mode
    /// decides whether the pipeline keeps going.
    #[error("validation failure: {0}")]
    Validation(String),

    /// Storage-layer failure; triggers rollback in the Load phase.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("stage timed out after {0} seconds")]
    Timeout(u64),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether the stage orchestrator may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Transient(_) | PipelineError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
