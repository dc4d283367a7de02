//! Prometheus metrics and structured logging for perpview.
//!
//! Provides observability for the market-data layer:
//! - Prometheus metrics for connection lifecycle, feed throughput,
//!   aggregation corrections and resolver cache behaviour
//! - Structured logging with tracing (JSON in production, pretty otherwise)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
