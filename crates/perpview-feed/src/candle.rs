//! Candle aggregation.
//!
//! Live ticks are bucketed at `floor(t / width) * width`:
//! - later bucket: open a new bar, `open` = previous close (or the tick
//!   price when there is no bar), high = low = close = tick price
//! - same bucket: high = max, low = min, close = tick price
//! - earlier bucket: drop the tick, history is never rewritten
//!
//! Historical bars seed the series; the last one becomes the current bar.

use perpview_core::{Candle, MarketId, PriceTick, Resolution};
use perpview_telemetry::Metrics;
use tracing::debug;

/// Bars kept in memory per aggregator before the oldest are dropped.
const DEFAULT_MAX_BARS: usize = 5_000;

/// Fold a sorted-or-unsorted bar series into wider buckets.
///
/// Open is the first bar's open, high the max, low the min, close the last
/// bar's close, volume the sum. Output is sorted by bucket start.
pub fn rebucket(history: &[Candle], resolution: Resolution, width_ms: i64) -> Vec<Candle> {
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|c| c.bucket_start_ms);

    let mut out: Vec<Candle> = Vec::new();
    for bar in sorted {
        let start = Candle::bucket_start(bar.bucket_start_ms, width_ms);
        match out.last_mut() {
            Some(current) if current.bucket_start_ms == start => {
                current.high = current.high.max(bar.high);
                current.low = current.low.min(bar.low);
                current.close = bar.close;
                current.volume += bar.volume;
            }
            _ => out.push(Candle {
                bucket_start_ms: start,
                bucket_end_ms: start + width_ms,
                resolution,
                ..bar
            }),
        }
    }
    out
}

/// Per-stream OHLC state for one market at one resolution.
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    market_id: MarketId,
    resolution: Resolution,
    width_ms: i64,
    bars: Vec<Candle>,
    dedupe_by_timestamp: bool,
    last_tick_ms: Option<i64>,
    max_bars: usize,
}

impl CandleAggregator {
    pub fn new(market_id: MarketId, resolution: Resolution) -> Self {
        Self::with_width(market_id, resolution, resolution.width_ms())
    }

    /// Aggregator with an explicit bucket width.
    pub fn with_width(market_id: MarketId, resolution: Resolution, width_ms: i64) -> Self {
        Self {
            market_id,
            resolution,
            width_ms: width_ms.max(1),
            bars: Vec::new(),
            dedupe_by_timestamp: false,
            last_tick_ms: None,
            max_bars: DEFAULT_MAX_BARS,
        }
    }

    /// Ignore a tick whose timestamp equals the last applied one.
    ///
    /// Off by default: a duplicate delivery re-sets `close` (last write wins).
    pub fn with_dedupe(mut self, dedupe_by_timestamp: bool) -> Self {
        self.dedupe_by_timestamp = dedupe_by_timestamp;
        self
    }

    pub fn with_max_bars(mut self, max_bars: usize) -> Self {
        self.max_bars = max_bars.max(1);
        self
    }

    /// Replace the series with historical bars.
    ///
    /// Bars at a different resolution (the source of a synthetic one) are
    /// re-bucketed to this aggregator's width.
    pub fn with_history(mut self, history: Vec<Candle>) -> Self {
        self.load_history(history);
        self
    }

    pub fn load_history(&mut self, mut history: Vec<Candle>) {
        if history.iter().any(|c| c.resolution != self.resolution) {
            history = rebucket(&history, self.resolution, self.width_ms);
        } else {
            history.sort_by_key(|c| c.bucket_start_ms);
        }
        debug!(
            market = %self.market_id,
            resolution = %self.resolution,
            bars = history.len(),
            "Candle history loaded"
        );
        self.bars = history;
        self.last_tick_ms = None;
        self.trim();
    }

    /// Switch resolution. All bar state is rebuilt from `history`.
    pub fn reset(&mut self, resolution: Resolution, history: Vec<Candle>) {
        self.resolution = resolution;
        self.width_ms = resolution.width_ms();
        self.load_history(history);
    }

    pub fn market_id(&self) -> &MarketId {
        &self.market_id
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn width_ms(&self) -> i64 {
        self.width_ms
    }

    /// All bars, oldest first. Only the last one is still mutable.
    pub fn bars(&self) -> &[Candle] {
        &self.bars
    }

    pub fn current(&self) -> Option<&Candle> {
        self.bars.last()
    }

    pub fn apply(&mut self, tick: &PriceTick) -> Option<Candle> {
        self.apply_tick(tick.mark_price, tick.transaction_time_ms)
    }

    /// Fold one tick. Returns the bar it created or updated, or `None` when
    /// the tick was dropped.
    pub fn apply_tick(&mut self, price: f64, time_ms: i64) -> Option<Candle> {
        if !price.is_finite() {
            debug!(market = %self.market_id, time_ms, "Non-finite tick dropped");
            return None;
        }
        if self.dedupe_by_timestamp && self.last_tick_ms == Some(time_ms) {
            debug!(market = %self.market_id, time_ms, "Duplicate tick ignored");
            return None;
        }

        let bucket = Candle::bucket_start(time_ms, self.width_ms);
        match self.bars.last_mut() {
            Some(current) if bucket == current.bucket_start_ms => current.apply_price(price),
            Some(current) if bucket < current.bucket_start_ms => {
                Metrics::candle_late_tick(self.market_id.as_str());
                debug!(
                    market = %self.market_id,
                    time_ms,
                    current_bucket = current.bucket_start_ms,
                    "Late tick dropped"
                );
                return None;
            }
            current => {
                let open = current.map_or(price, |c| c.close);
                self.bars.push(Candle::opening(
                    bucket,
                    self.width_ms,
                    self.resolution,
                    open,
                    price,
                ));
                self.trim();
            }
        }

        self.last_tick_ms = Some(time_ms);
        Metrics::candle_tick(self.market_id.as_str());
        self.bars.last().copied()
    }

    fn trim(&mut self) {
        if self.bars.len() > self.max_bars {
            let excess = self.bars.len() - self.max_bars;
            self.bars.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market() -> MarketId {
        MarketId::new("APT_USD")
    }

    fn bar(start: i64, resolution: Resolution, o: f64, h: f64, l: f64, c: f64, v: f64) -> Candle {
        Candle {
            bucket_start_ms: start,
            bucket_end_ms: start + resolution.width_ms(),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: v,
            resolution,
        }
    }

    #[test]
    fn test_tick_scenario_1000ms_buckets() {
        let mut agg = CandleAggregator::with_width(market(), Resolution::OneMinute, 1000);

        agg.apply_tick(10.0, 1000);
        agg.apply_tick(12.0, 1500);
        let second = agg.apply_tick(9.0, 2000).unwrap();

        let bars = agg.bars();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].bucket_start_ms, 1000);
        assert_eq!(
            (bars[0].open, bars[0].high, bars[0].low, bars[0].close),
            (10.0, 12.0, 10.0, 12.0)
        );
        assert_eq!(second.bucket_start_ms, 2000);
        assert_eq!(second.bucket_end_ms, 3000);
        assert_eq!(
            (second.open, second.high, second.low, second.close),
            (12.0, 9.0, 9.0, 9.0)
        );
        assert_eq!(second.volume, 0.0);
    }

    #[test]
    fn test_first_tick_seeds_bar_when_history_empty() {
        let mut agg = CandleAggregator::new(market(), Resolution::OneMinute).with_history(vec![]);
        let first = agg.apply_tick(8.5, 61_000).unwrap();
        assert_eq!(first.bucket_start_ms, 60_000);
        assert_eq!(first.open, 8.5);
        assert!(first.is_consistent());
    }

    #[test]
    fn test_late_tick_dropped() {
        let mut agg = CandleAggregator::with_width(market(), Resolution::OneMinute, 1000);
        agg.apply_tick(10.0, 2500);
        assert!(agg.apply_tick(99.0, 1999).is_none());

        let current = agg.current().unwrap();
        assert_eq!(current.bucket_start_ms, 2000);
        assert_eq!(current.high, 10.0);
        assert_eq!(agg.bars().len(), 1);
    }

    #[test]
    fn test_sorted_ticks_keep_ohlc_invariants_within_bucket() {
        let mut agg = CandleAggregator::with_width(market(), Resolution::OneMinute, 1000);
        let prices = [10.0, 11.5, 9.25, 10.75, 10.0, 12.0, 8.0, 8.5];
        for (i, price) in prices.iter().enumerate() {
            agg.apply_tick(*price, i as i64 * 300);
        }

        let bars = agg.bars();
        assert!(bars
            .windows(2)
            .all(|w| w[0].bucket_start_ms < w[1].bucket_start_ms));
        for bar in bars {
            // The carried-over open can sit outside the bucket's own range.
            assert!(bar.high >= bar.close && bar.low <= bar.close);
            assert!(bar.high >= bar.low);
        }
        assert!(bars[0].is_consistent());
    }

    #[test]
    fn test_duplicate_tick_keeps_high_low() {
        let mut agg = CandleAggregator::with_width(market(), Resolution::OneMinute, 1000);
        agg.apply_tick(10.0, 1000);
        agg.apply_tick(12.0, 1200);
        let before = *agg.current().unwrap();

        let after = agg.apply_tick(12.0, 1200).unwrap();
        assert_eq!(after.high, before.high);
        assert_eq!(after.low, before.low);
        assert_eq!(after.close, 12.0);
    }

    #[test]
    fn test_duplicate_timestamp_last_write_wins_by_default() {
        let mut agg = CandleAggregator::with_width(market(), Resolution::OneMinute, 1000);
        agg.apply_tick(10.0, 1000);
        agg.apply_tick(11.0, 1000);
        assert_eq!(agg.current().unwrap().close, 11.0);
    }

    #[test]
    fn test_dedupe_by_timestamp() {
        let mut agg =
            CandleAggregator::with_width(market(), Resolution::OneMinute, 1000).with_dedupe(true);
        agg.apply_tick(10.0, 1000);
        assert!(agg.apply_tick(11.0, 1000).is_none());
        assert_eq!(agg.current().unwrap().close, 10.0);
        assert!(agg.apply_tick(11.0, 1001).is_some());
    }

    #[test]
    fn test_history_seeds_current_bar() {
        let history = vec![
            bar(120_000, Resolution::OneMinute, 11.0, 12.0, 10.5, 11.5, 7.0),
            bar(60_000, Resolution::OneMinute, 10.0, 11.0, 9.5, 11.0, 5.0),
        ];
        let mut agg = CandleAggregator::new(market(), Resolution::OneMinute).with_history(history);
        assert_eq!(agg.bars()[0].bucket_start_ms, 60_000);

        // Same bucket as the last historical bar: updated in place.
        let updated = agg.apply_tick(12.5, 150_000).unwrap();
        assert_eq!(updated.bucket_start_ms, 120_000);
        assert_eq!(updated.high, 12.5);
        assert_eq!(updated.volume, 7.0);
        assert_eq!(agg.bars().len(), 2);

        // Older than the last historical bar: dropped.
        assert!(agg.apply_tick(1.0, 90_000).is_none());

        // Next bucket opens at the previous close.
        let next = agg.apply_tick(12.0, 185_000).unwrap();
        assert_eq!(next.bucket_start_ms, 180_000);
        assert_eq!(next.open, 12.5);
    }

    #[test]
    fn test_synthetic_resolution_rebuckets_history() {
        let history: Vec<Candle> = (0..10)
            .map(|i| {
                let base = 100.0 + i as f64;
                bar(
                    i * 60_000,
                    Resolution::OneMinute,
                    base,
                    base + 2.0,
                    base - 1.0,
                    base + 0.5,
                    1.0,
                )
            })
            .rev()
            .collect();

        let agg =
            CandleAggregator::new(market(), Resolution::FiveMinutes).with_history(history);
        let bars = agg.bars();
        assert_eq!(bars.len(), 2);

        let first = bars[0];
        assert_eq!(first.bucket_start_ms, 0);
        assert_eq!(first.bucket_end_ms, 300_000);
        assert_eq!(first.resolution, Resolution::FiveMinutes);
        assert_eq!(first.open, 100.0);
        assert_eq!(first.high, 106.0);
        assert_eq!(first.low, 99.0);
        assert_eq!(first.close, 104.5);
        assert_eq!(first.volume, 5.0);

        assert_eq!(bars[1].bucket_start_ms, 300_000);
        assert_eq!(bars[1].open, 105.0);
        assert_eq!(bars[1].close, 109.5);
    }

    #[test]
    fn test_reset_rebuilds_state() {
        let mut agg = CandleAggregator::new(market(), Resolution::OneMinute);
        agg.apply_tick(10.0, 30_000);
        agg.apply_tick(11.0, 90_000);

        agg.reset(Resolution::FifteenMinutes, vec![]);
        assert!(agg.bars().is_empty());
        assert_eq!(agg.width_ms(), 900_000);

        let first = agg.apply_tick(9.0, 95_000).unwrap();
        assert_eq!(first.bucket_start_ms, 0);
        assert_eq!(first.open, 9.0);
        assert_eq!(first.resolution, Resolution::FifteenMinutes);
    }

    #[test]
    fn test_negative_timestamps_floor() {
        let mut agg = CandleAggregator::with_width(market(), Resolution::OneMinute, 1000);
        let bar = agg.apply_tick(1.0, -1).unwrap();
        assert_eq!(bar.bucket_start_ms, -1000);
    }

    #[test]
    fn test_max_bars_trims_oldest() {
        let mut agg = CandleAggregator::with_width(market(), Resolution::OneMinute, 1000)
            .with_max_bars(3);
        for i in 0..5 {
            agg.apply_tick(10.0 + i as f64, i * 1000);
        }
        let starts: Vec<i64> = agg.bars().iter().map(|b| b.bucket_start_ms).collect();
        assert_eq!(starts, vec![2000, 3000, 4000]);
    }
}
