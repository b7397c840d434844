use std::fmt::{self, Display};

/// Errors produced by model parsing routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    InvalidId(String),
    InvalidStatus(String),
    UnknownField(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidId(raw) => write!(f, "invalid id: {raw}"),
            ModelError::InvalidStatus(raw) => {
                write!(f, "invalid status: {raw}")
            }
            ModelError::UnknownField(raw) => {
                write!(f, "unknown record field: {raw}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
