//! Service configuration.

use crate::error::{AppError, AppResult};
use perpview_registry::{StaticMarket, DEFAULT_CACHE_TTL};
use perpview_ws::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable consulted when no `--config` is given.
pub const CONFIG_ENV: &str = "PERPVIEW_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub ws: ConnectionConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub feed: FeedConfig,
}

/// Market listing and history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_info_url")]
    pub info_url: String,
    /// How long a market listing is trusted (seconds).
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Extra or overriding entries for the static fallback table.
    #[serde(default)]
    pub static_markets: Vec<StaticMarket>,
}

fn default_info_url() -> String {
    "https://api.perpview.exchange/info".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL.as_secs()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            info_url: default_info_url(),
            cache_ttl_secs: default_cache_ttl_secs(),
            request_timeout_ms: default_request_timeout_ms(),
            static_markets: Vec::new(),
        }
    }
}

impl RegistryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Live stream behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Silence after which a live stream reports `Stalled` (ms). 0 disables.
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,
    /// Ignore a tick whose timestamp equals the previous one.
    #[serde(default)]
    pub dedupe_by_timestamp: bool,
    /// Bars retained per candle stream.
    #[serde(default = "default_max_bars")]
    pub max_bars: usize,
}

fn default_stall_timeout_ms() -> u64 {
    30_000
}

fn default_max_bars() -> usize {
    5_000
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            stall_timeout_ms: default_stall_timeout_ms(),
            dedupe_by_timestamp: false,
            max_bars: default_max_bars(),
        }
    }
}

impl FeedConfig {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration.
    ///
    /// Path order: `cli_path`, then `PERPVIEW_CONFIG`, then
    /// `config/default.toml`. A missing file yields the defaults.
    pub fn load(cli_path: Option<&str>) -> AppResult<Self> {
        let config_path = cli_path
            .map(str::to_string)
            .or_else(|| std::env::var(CONFIG_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.ws.url.is_empty() {
            return Err(AppError::Config("ws.url must not be empty".to_string()));
        }
        if self.registry.info_url.is_empty() {
            return Err(AppError::Config(
                "registry.info_url must not be empty".to_string(),
            ));
        }
        if self.registry.cache_ttl_secs == 0 {
            return Err(AppError::Config(
                "registry.cache_ttl_secs must be positive".to_string(),
            ));
        }
        if self.ws.reconnect_base_delay_ms > self.ws.reconnect_max_delay_ms {
            return Err(AppError::Config(
                "ws.reconnect_base_delay_ms exceeds ws.reconnect_max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}
