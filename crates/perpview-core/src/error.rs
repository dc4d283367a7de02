//! Error types for perpview-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Invalid channel: {0}")]
    InvalidChannel(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
