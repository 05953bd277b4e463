//! Error types for tally-core

use thiserror::Error;

use crate::backend::BackendError;

/// Result type alias using tally-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tally-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend transport or API error
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Invalid terminal configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Another day close is already running on this terminal
    #[error("A day close is already running on this terminal")]
    CloseInProgress,
}
