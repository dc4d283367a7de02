//! Depth ladder aggregation.
//!
//! Every sample is recomputed from scratch:
//! 1. drop unusable levels, sort bids descending and asks ascending
//! 2. truncate each side to `depth` rows
//! 3. if the book is crossed, keep bids at or below the best ask and asks
//!    at or above the best bid; a side that filtering would empty is kept
//!    unfiltered
//! 4. annotate running cumulative totals

use perpview_core::{DepthLadder, DepthLevel, LadderLevel, MarketId};
use perpview_telemetry::Metrics;
use std::cmp::Ordering;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DepthAggregator {
    market_id: MarketId,
    depth: usize,
}

impl DepthAggregator {
    pub fn new(market_id: MarketId, depth: usize) -> Self {
        Self {
            market_id,
            depth: depth.max(1),
        }
    }

    pub fn market_id(&self) -> &MarketId {
        &self.market_id
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Build the ladder for one bid/ask sample.
    pub fn apply(&self, bids: Vec<DepthLevel>, asks: Vec<DepthLevel>) -> DepthLadder {
        let mut bids = self.prepare(bids, |a, b| b.price.total_cmp(&a.price));
        let mut asks = self.prepare(asks, |a, b| a.price.total_cmp(&b.price));

        if let (Some(best_bid), Some(best_ask)) = (bids.first(), asks.first()) {
            let (best_bid, best_ask) = (best_bid.price, best_ask.price);
            if best_bid > best_ask {
                Metrics::depth_crossed(self.market_id.as_str());
                debug!(market = %self.market_id, best_bid, best_ask, "Crossed book sample");

                let filtered_bids: Vec<_> =
                    bids.iter().copied().filter(|l| l.price <= best_ask).collect();
                let filtered_asks: Vec<_> =
                    asks.iter().copied().filter(|l| l.price >= best_bid).collect();
                if !filtered_bids.is_empty() {
                    bids = filtered_bids;
                }
                if !filtered_asks.is_empty() {
                    asks = filtered_asks;
                }
            }
        }

        DepthLadder {
            best_bid: bids.first().map(|l| l.price),
            best_ask: asks.first().map(|l| l.price),
            bids: with_totals(&bids),
            asks: with_totals(&asks),
        }
    }

    fn prepare(
        &self,
        levels: Vec<DepthLevel>,
        order: impl Fn(&DepthLevel, &DepthLevel) -> Ordering,
    ) -> Vec<DepthLevel> {
        let mut levels: Vec<DepthLevel> = levels.into_iter().filter(DepthLevel::is_valid).collect();
        levels.sort_by(order);
        levels.truncate(self.depth);
        levels
    }
}

fn with_totals(levels: &[DepthLevel]) -> Vec<LadderLevel> {
    let mut total = 0.0;
    levels
        .iter()
        .map(|l| {
            total += l.size;
            LadderLevel {
                price: l.price,
                size: l.size,
                total,
            }
        })
        .collect()
}
