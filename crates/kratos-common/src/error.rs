//! Error types and result handling for the Kratos core

use thiserror::Error;

/// Result type alias for Kratos operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Kratos core operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Knowledge base error: {0}")]
    Knowledge(String),

    #[error("Prediction error: {0}")]
    Prediction(String),

    #[error("Remediation error: {0}")]
    Remediation(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Orchestrator(_) | Error::Timeout(_) | Error::Io(_))
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::Knowledge(_) => "knowledge",
            Error::Prediction(_) => "prediction",
            Error::Remediation(_) => "remediation",
            Error::Validation(_) => "validation",
            Error::Orchestrator(_) => "orchestrator",
            Error::Timeout(_) => "timeout",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
        }
    }
}
