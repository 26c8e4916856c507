//! Node error types.

use thiserror::Error;

/// Errors that can occur while configuring or starting a node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration loaded but failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// HTTP client construction failed.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
