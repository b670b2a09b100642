use thiserror::Error;

/// Unified error type for every Vigil crate.
#[derive(Error, Debug)]
pub enum VigilError {
    // ── Caller errors ──────────────────────────────────────────
    #[error("validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    // ── Moderation errors ──────────────────────────────────────
    #[error("moderation capability unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("moderation verdict unusable: {0}")]
    Moderation(String),

    #[error("llm provider error: {0}")]
    LlmProvider(String),

    #[error("llm rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("model not found: {0}")]
    ModelNotFound(String),

    // ── Infrastructure errors ──────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl VigilError {
    /// Shorthand for a [`VigilError::Validation`] on a named field.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error means the moderation capability could not produce a verdict.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable(_)
                | Self::Moderation(_)
                | Self::LlmProvider(_)
                | Self::RateLimited { .. }
                | Self::ModelNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VigilError>;
