//! Consumer-facing market data entry points.
//!
//! `MarketDataService` ties the pooled subscription layer, the aggregators
//! and the resolution cache together. Each `get_*` call hands back a stream
//! the caller owns; dropping or cancelling it releases the connection lease.

use crate::config::{AppConfig, FeedConfig};
use crate::error::{AppError, AppResult};
use chrono::Utc;
use perpview_core::{Candle, Channel, MarketId, Resolution, Symbol};
use perpview_feed::{CandleAggregator, CandleStream, DepthAggregator, DepthStream, FeedStream};
use perpview_registry::{CandleHistory, MarketListing, MarketResolver, MetaClient};
use perpview_ws::SubscriptionMultiplexer;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Inclusive time window in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeRange {
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self { start_ms, end_ms }
    }

    /// The `window` ending now.
    pub fn last(window: Duration) -> Self {
        let end_ms = Utc::now().timestamp_millis();
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        Self::new(end_ms.saturating_sub(window_ms), end_ms)
    }
}

/// Historical bars plus the live stream continuing them.
#[derive(Debug)]
pub struct CandleFeed {
    /// Bars at the requested resolution, ascending.
    pub history: Vec<Candle>,
    pub stream: CandleStream,
}

pub struct MarketDataService<S = MetaClient> {
    multiplexer: SubscriptionMultiplexer,
    resolver: Arc<MarketResolver<S>>,
    feed: FeedConfig,
}

impl<S> Clone for MarketDataService<S> {
    fn clone(&self) -> Self {
        Self {
            multiplexer: self.multiplexer.clone(),
            resolver: Arc::clone(&self.resolver),
            feed: self.feed.clone(),
        }
    }
}

impl MarketDataService<MetaClient> {
    /// Service backed by the HTTP info endpoint.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let client = MetaClient::with_timeout(
            config.registry.info_url.clone(),
            config.registry.request_timeout(),
        )?;
        Ok(Self::with_source(config, client))
    }
}

impl<S: MarketListing + CandleHistory> MarketDataService<S> {
    /// `source` serves both the market listing and candle history.
    pub fn with_source(config: &AppConfig, source: S) -> Self {
        let resolver = MarketResolver::with_config(
            source,
            config.registry.cache_ttl(),
            &config.registry.static_markets,
        );
        Self {
            multiplexer: SubscriptionMultiplexer::new(config.ws.clone()),
            resolver: Arc::new(resolver),
            feed: config.feed.clone(),
        }
    }

    pub fn multiplexer(&self) -> &SubscriptionMultiplexer {
        &self.multiplexer
    }

    pub fn resolver(&self) -> &MarketResolver<S> {
        &self.resolver
    }

    pub async fn get_market_id(&self, symbol: &Symbol) -> AppResult<MarketId> {
        Ok(self.resolver.resolve(symbol).await?)
    }

    /// History for `range` followed by the live bar stream.
    ///
    /// The live subscription is opened before history is fetched, so ticks
    /// arriving meanwhile are buffered and folded onto the last bar.
    pub async fn get_candles(
        &self,
        symbol: &Symbol,
        resolution: Resolution,
        range: TimeRange,
    ) -> AppResult<CandleFeed> {
        if range.start_ms > range.end_ms {
            return Err(AppError::InvalidRequest(format!(
                "range start {} is after end {}",
                range.start_ms, range.end_ms
            )));
        }

        let market_id = self.get_market_id(symbol).await?;
        let subscription = self
            .multiplexer
            .subscribe(market_id.clone(), Channel::Price)
            .await?;

        let source = resolution.source();
        let history = self
            .resolver
            .listing()
            .fetch_candles(&market_id, source, range.start_ms, range.end_ms)
            .await?;
        debug!(
            market = %market_id,
            %resolution,
            %source,
            bars = history.len(),
            "Candle history fetched"
        );

        let aggregator = CandleAggregator::new(market_id.clone(), resolution)
            .with_dedupe(self.feed.dedupe_by_timestamp)
            .with_max_bars(self.feed.max_bars)
            .with_history(history);
        let history = aggregator.bars().to_vec();

        info!(%symbol, market = %market_id, %resolution, bars = history.len(), "Candle feed opened");
        Ok(CandleFeed {
            history,
            stream: FeedStream::new(subscription, aggregator, self.feed.stall_timeout()),
        })
    }

    /// Live ladder limited to `depth` rows per side.
    pub async fn get_depth(&self, symbol: &Symbol, depth: usize) -> AppResult<DepthStream> {
        if depth == 0 {
            return Err(AppError::InvalidRequest("depth must be positive".to_string()));
        }

        let market_id = self.get_market_id(symbol).await?;
        let subscription = self
            .multiplexer
            .subscribe(market_id.clone(), Channel::Depth)
            .await?;

        info!(%symbol, market = %market_id, depth, "Depth feed opened");
        Ok(FeedStream::new(
            subscription,
            DepthAggregator::new(market_id, depth),
            self.feed.stall_timeout(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perpview_registry::{ListedMarket, RegistryError, RegistryResult};

    struct NoExchange;

    impl MarketListing for NoExchange {
        async fn fetch_markets(&self) -> RegistryResult<Vec<ListedMarket>> {
            Err(RegistryError::HttpClient("offline".to_string()))
        }
    }

    impl CandleHistory for NoExchange {
        async fn fetch_candles(
            &self,
            _market_id: &MarketId,
            _resolution: Resolution,
            _start_ms: i64,
            _end_ms: i64,
        ) -> RegistryResult<Vec<Candle>> {
            Ok(Vec::new())
        }
    }

    fn service() -> MarketDataService<NoExchange> {
        MarketDataService::with_source(&AppConfig::default(), NoExchange)
    }

    #[test]
    fn test_time_range_last() {
        let range = TimeRange::last(Duration::from_secs(60));
        assert_eq!(range.end_ms - range.start_ms, 60_000);
    }

    #[tokio::test]
    async fn test_market_id_from_static_table_when_offline() {
        let id = service()
            .get_market_id(&Symbol::new("eth-usd").unwrap())
            .await
            .unwrap();
        assert_eq!(id, MarketId::new("ETH_USD"));
    }

    #[tokio::test]
    async fn test_unknown_symbol_rejected() {
        let err = tokio_test::assert_err!(
            service()
                .get_depth(&Symbol::new("NOPE/USD").unwrap(), 10)
                .await
        );
        assert!(matches!(
            err,
            AppError::Registry(RegistryError::UnknownMarket(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_requests_rejected() {
        let svc = service();
        let symbol = Symbol::new("APT/USD").unwrap();

        let depth = svc.get_depth(&symbol, 0).await;
        assert!(matches!(depth, Err(AppError::InvalidRequest(_))));

        let candles = svc
            .get_candles(&symbol, Resolution::OneMinute, TimeRange::new(10, 5))
            .await;
        assert!(matches!(candles, Err(AppError::InvalidRequest(_))));
        assert_eq!(svc.multiplexer().connection().ref_count(), 0);
    }
}
