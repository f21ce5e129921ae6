use thiserror::Error;

#[derive(Error, Debug)]
pub enum TallyError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Harvesting error: {0}")]
    Harvest(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TallyError {
    /// Failures worth another attempt after a pause.
    pub fn is_transient(&self) -> bool {
        matches!(self, TallyError::Storage(_) | TallyError::Harvest(_))
    }

    pub fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        TallyError::Storage(format!("{context}: {err}"))
    }
}

impl From<tallyflow_model::ModelError> for TallyError {
    fn from(err: tallyflow_model::ModelError) -> Self {
        TallyError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TallyError>;
