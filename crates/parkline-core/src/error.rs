//! Error types for parkline-core

use thiserror::Error;

/// Result type alias using parkline-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in parkline-core operations
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

    /// Record or lookup target not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Durable storage could not record a write
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote API call failed
    #[error("Remote error: {0}")]
    Gateway(#[from] crate::gateway::GatewayError),

    /// Operation requires connectivity
    #[error("No network connection")]
    Offline,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}
