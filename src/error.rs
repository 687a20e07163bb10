//! Error types for Vigil
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in Vigil
#[derive(Debug, Error)]
pub enum VigilError {
    /// Configuration file could not be read or was invalid
    #[error("Config error: {0}")]
    Config(String),

    /// A check-execution collaborator reported a failure
    #[error("Check error: {0}")]
    Check(String),

    /// Referenced host or service does not exist in the object model
    #[error("Unknown object: {0}")]
    UnknownObject(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Vigil operations
pub type Result<T> = std::result::Result<T, VigilError>;
