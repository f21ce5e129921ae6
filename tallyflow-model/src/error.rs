use std::fmt::{self, Display};

/// Errors produced by model parsing and validation routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    UnknownTaskState(String),
    UnknownRecordState(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::UnknownTaskState(raw) => {
                write!(f, "unknown task state: {raw}")
            }
            ModelError::UnknownRecordState(raw) => {
                write!(f, "unknown record state: {raw}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
