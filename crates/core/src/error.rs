//! Core error types

use thiserror::Error;

/// Core error type for meshid
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration could not be used
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML parse error
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
