//! HTTP client for the exchange info endpoint.
//!
//! Both calls are `POST <info_url>` with a JSON body tagged by `type`:
//! - `{"type": "markets"}` returns `[{"symbol": "APT/USD", "marketId": "APT_USD"}, ...]`
//! - `{"type": "candleSnapshot", "req": {...}}` returns
//!   `[{"t": start, "T": end, "o", "h", "l", "c", "v"}, ...]`

use crate::error::{RegistryError, RegistryResult};
use perpview_core::serde_num::{f64_lenient, i64_lenient};
use perpview_core::{Candle, MarketId, Resolution};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Default timeout for API requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of the bulk symbol listing.
pub trait MarketListing: Send + Sync {
    fn fetch_markets(&self) -> impl Future<Output = RegistryResult<Vec<ListedMarket>>> + Send;
}

/// Source of historical bars.
pub trait CandleHistory: Send + Sync {
    /// Bars for `[start_ms, end_ms]` at a natively served resolution.
    fn fetch_candles(
        &self,
        market_id: &MarketId,
        resolution: Resolution,
        start_ms: i64,
        end_ms: i64,
    ) -> impl Future<Output = RegistryResult<Vec<Candle>>> + Send;
}

/// One entry of the market listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedMarket {
    pub symbol: String,
    pub market_id: String,
}

#[derive(Debug, Serialize)]
struct InfoRequest {
    #[serde(rename = "type")]
    request_type: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CandleSnapshotReq<'a> {
    market: &'a str,
    interval: &'a str,
    start_time: i64,
    end_time: i64,
}

#[derive(Debug, Serialize)]
struct CandleSnapshotRequest<'a> {
    #[serde(rename = "type")]
    request_type: &'static str,
    req: CandleSnapshotReq<'a>,
}

#[derive(Debug, Deserialize)]
struct RawCandle {
    #[serde(rename = "t", deserialize_with = "i64_lenient")]
    open_time: i64,
    #[serde(rename = "o", deserialize_with = "f64_lenient")]
    open: f64,
    #[serde(rename = "h", deserialize_with = "f64_lenient")]
    high: f64,
    #[serde(rename = "l", deserialize_with = "f64_lenient")]
    low: f64,
    #[serde(rename = "c", deserialize_with = "f64_lenient")]
    close: f64,
    #[serde(rename = "v", default, deserialize_with = "f64_lenient")]
    volume: f64,
}

impl RawCandle {
    fn into_candle(self, resolution: Resolution) -> Candle {
        Candle {
            bucket_start_ms: self.open_time,
            bucket_end_ms: self.open_time + resolution.width_ms(),
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            resolution,
        }
    }
}

/// Client for the exchange info endpoint.
pub struct MetaClient {
    client: Client,
    info_url: String,
}

impl MetaClient {
    /// Create a client with the default request timeout.
    pub fn new(info_url: impl Into<String>) -> RegistryResult<Self> {
        Self::with_timeout(info_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(info_url: impl Into<String>, timeout: Duration) -> RegistryResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            info_url: info_url.into(),
        })
    }

    pub fn info_url(&self) -> &str {
        &self.info_url
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, body: &B) -> RegistryResult<T> {
        let response = self
            .client
            .post(&self.info_url)
            .json(body)
            .send()
            .await
            .map_err(|e| RegistryError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::HttpClient(format!("HTTP {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| RegistryError::ParseError(format!("Failed to parse response: {e}")))
    }
}

impl MarketListing for MetaClient {
    async fn fetch_markets(&self) -> RegistryResult<Vec<ListedMarket>> {
        info!(url = %self.info_url, "Fetching market listing");
        let markets: Vec<ListedMarket> = self
            .post(&InfoRequest {
                request_type: "markets",
            })
            .await?;
        debug!(count = markets.len(), "Market listing received");
        Ok(markets)
    }
}

impl CandleHistory for MetaClient {
    async fn fetch_candles(
        &self,
        market_id: &MarketId,
        resolution: Resolution,
        start_ms: i64,
        end_ms: i64,
    ) -> RegistryResult<Vec<Candle>> {
        debug!(
            market = %market_id,
            %resolution,
            start_ms,
            end_ms,
            "Fetching candle snapshot"
        );
        let request = CandleSnapshotRequest {
            request_type: "candleSnapshot",
            req: CandleSnapshotReq {
                market: market_id.as_str(),
                interval: resolution.as_str(),
                start_time: start_ms,
                end_time: end_ms,
            },
        };
        let raw: Vec<RawCandle> = self.post(&request).await?;
        Ok(raw
            .into_iter()
            .map(|c| c.into_candle(resolution))
            .collect())
    }
}
