//! perpview market data service.
//!
//! Composition root for the workspace:
//! - `MarketDataService`: symbol resolution, candle feeds and depth feeds
//!   over one pooled WebSocket connection
//! - `AppConfig`: TOML configuration for the connection, registry and feeds
//! - `write_metrics`: Prometheus text snapshot for the CLI

pub mod config;
pub mod error;
pub mod service;
pub mod snapshot;

pub use config::{AppConfig, FeedConfig, RegistryConfig};
pub use error::{AppError, AppResult};
pub use service::{CandleFeed, MarketDataService, TimeRange};
pub use snapshot::write_metrics;
