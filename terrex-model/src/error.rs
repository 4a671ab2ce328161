use std::fmt::{self, Display};

/// Errors produced by model parsing and validation routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    UnknownStatus(String),
    UnknownSensor(String),
    UnknownSource(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::UnknownStatus(raw) => write!(f, "unknown status: {raw}"),
            ModelError::UnknownSensor(raw) => {
                write!(f, "unknown sensor family: {raw}")
            }
            ModelError::UnknownSource(raw) => {
                write!(f, "unknown order source: {raw}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
