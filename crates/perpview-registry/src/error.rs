//! Registry error types.

use perpview_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown market: {0}")]
    UnknownMarket(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(#[from] CoreError),

    #[error("Listing conflict: {0}")]
    ListingConflict(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
