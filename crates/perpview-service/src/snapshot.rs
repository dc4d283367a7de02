//! Prometheus text snapshot of the process metrics.

use crate::error::{AppError, AppResult};
use perpview_telemetry::Metrics;

/// Write the current metrics to `target`, or to stdout when it is `-`.
pub fn write_metrics(target: &str) -> AppResult<()> {
    let text = Metrics::encode_text()?;
    if target == "-" {
        print!("{text}");
        return Ok(());
    }
    std::fs::write(target, text)
        .map_err(|e| AppError::Output(format!("Failed to write metrics to {target}: {e}")))
}
