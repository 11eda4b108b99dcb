use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderwatchError {
    #[error("config not found: {0}")]
    ConfigNotFound(String),

    #[error("actions file not found: {0}")]
    ActionsNotFound(String),

    #[error("unknown event '{0}'")]
    UnknownEvent(String),

    #[error("unknown step type '{0}'")]
    UnknownStep(String),

    #[error("history is empty")]
    EmptyHistory,

    #[error("action {index} ({name}) has no valid steps")]
    InvalidAction { index: usize, name: String },

    #[error("invalid setting '{setting}' for step {step}: {reason}")]
    InvalidSetting {
        step: String,
        setting: String,
        reason: String,
    },

    #[error("step '{0}' did not validate against its config")]
    StepValidation(String),

    #[error("unknown placeholder '{{{0}}}' in template")]
    UnknownPlaceholder(String),

    #[error("render queue unavailable: {0}")]
    SourceUnavailable(String),

    #[error("render queue source timed out after {0}s")]
    SourceTimeout(u64),

    #[error("render queue command not found: {0}")]
    SourceCommandNotFound(String),

    #[error("step failed: {0}")]
    StepFailed(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RenderwatchError {
    /// True when the render queue could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            RenderwatchError::SourceUnavailable(_)
                | RenderwatchError::SourceTimeout(_)
                | RenderwatchError::SourceCommandNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RenderwatchError>;
