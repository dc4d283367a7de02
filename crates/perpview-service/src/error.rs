//! Service error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] perpview_ws::WsError),

    #[error("Registry error: {0}")]
    Registry(#[from] perpview_registry::RegistryError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] perpview_telemetry::TelemetryError),

    #[error("Output error: {0}")]
    Output(String),
}

pub type AppResult<T> = Result<T, AppError>;
