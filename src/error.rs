//! Error types for building and running the ASFP detector components.

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum AsfpError {
    /// A construction parameter is out of its allowed range
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Forward-pass inputs disagree with the configured layout
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// No constructor registered under the requested name
    #[error("Unknown {kind} '{name}'")]
    UnknownModule { kind: &'static str, name: String },

    /// A constructor was registered twice under the same name
    #[error("{kind} '{name}' is already registered")]
    DuplicateModule { kind: &'static str, name: String },

    /// YAML (de)serialization error
    #[error("Config error: {0}")]
    Config(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Recording or loading module weights failed
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
}

impl AsfpError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub(crate) fn shape(expected: impl ToString, actual: impl ToString) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AsfpError>;
